//! Lockstep Replay System
//!
//! This crate provides recording (`ReplayRecorder`) and playback
//! (`ReplayPlayer`) of a lockstep match's command stream, plus build
//! fingerprint acquisition so a replay's provenance can be checked before a
//! verification run is trusted.
//!
//! # Architecture
//!
//! Recording and playback both operate purely on the `Command`/`Tick`
//! stream; neither touches the authoritative game simulation directly. That
//! simulation is an external collaborator (see `lockstep_sim`'s crate docs):
//! a `ReplayPlayer` hands each tick's commands to whatever sink the caller
//! wires up (typically a `LockstepCoordinator` running in replay mode), and
//! the caller is the one that compares the resulting `SimulationHash`
//! against the checkpoints this crate surfaces.

#![deny(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use lockstep_sim::{Command, Tick};
use lockstep_wire::{
    BuildFingerprint, HashCheckpoint, ReplayArtifact, ReplayHeader, TickCommands,
};
use prost::Message;
use sha2::{Digest, Sha256};

// ============================================================================
// Replay Recorder
// ============================================================================

/// Records a match's command stream and hash checkpoints for later replay.
///
/// Operations mirror spec §4.3 exactly: [`Self::start`] begins a session and
/// resets all prior state, [`Self::record_command`] appends to the tick
/// currently open, [`Self::end_tick`] closes it (sparse: a tick with no
/// commands is simply omitted), [`Self::add_hash_checkpoint`] records a
/// `(tick, hash)` pair, and [`Self::stop`] detaches and returns the
/// accumulated artifact, returning the recorder to idle.
pub struct ReplayRecorder {
    recording: bool,
    header: Option<ReplayHeader>,
    ticks: Vec<(Tick, Vec<Command>)>,
    current_tick_commands: Vec<Command>,
    checkpoints: Vec<(Tick, u32)>,
    end_tick: Tick,
}

impl Default for ReplayRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayRecorder {
    pub fn new() -> Self {
        Self {
            recording: false,
            header: None,
            ticks: Vec::new(),
            current_tick_commands: Vec::new(),
            checkpoints: Vec::new(),
            end_tick: 0,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Begin a recording session. Resets all internal state, so a recorder
    /// reused across matches never leaks the previous match's ticks.
    pub fn start(&mut self, header: ReplayHeader) {
        self.recording = true;
        self.header = Some(header);
        self.ticks.clear();
        self.current_tick_commands.clear();
        self.checkpoints.clear();
        self.end_tick = 0;
    }

    /// Append `cmd` to the tick currently open. Ignored when not recording.
    pub fn record_command(&mut self, cmd: Command) {
        if !self.recording {
            return;
        }
        self.current_tick_commands.push(cmd);
    }

    /// Close `tick`. If it accumulated any commands via [`Self::record_command`]
    /// since the last call, append `(tick, commands)` to the artifact;
    /// otherwise the tick is simply omitted (sparse storage, §3). Updates
    /// `end_tick` regardless. Ignored when not recording.
    pub fn end_tick(&mut self, tick: Tick) {
        if !self.recording {
            return;
        }
        if !self.current_tick_commands.is_empty() {
            self.ticks.push((tick, std::mem::take(&mut self.current_tick_commands)));
        }
        self.end_tick = tick;
    }

    /// Record a `(tick, hash)` checkpoint. Ignored when not recording.
    pub fn add_hash_checkpoint(&mut self, tick: Tick, hash: u32) {
        if !self.recording {
            return;
        }
        self.checkpoints.push((tick, hash));
    }

    /// Detach and return the accumulated artifact; the recorder returns to
    /// idle (a further `record_command`/`end_tick`/`add_hash_checkpoint`
    /// call is a no-op until [`Self::start`] is called again).
    pub fn stop(&mut self) -> ReplayArtifact {
        self.recording = false;
        let header = self.header.take();
        let ticks = std::mem::take(&mut self.ticks)
            .into_iter()
            .map(|(tick, commands)| TickCommands {
                tick,
                commands: commands.iter().map(lockstep_wire::CommandProto::from).collect(),
            })
            .collect();
        let checkpoints = std::mem::take(&mut self.checkpoints)
            .into_iter()
            .map(|(tick, hash)| HashCheckpoint { tick, hash })
            .collect();

        ReplayArtifact {
            header,
            ticks,
            checkpoints,
            end_tick: self.end_tick,
        }
    }
}

// ============================================================================
// Replay Player
// ============================================================================

/// A replay artifact that failed structural validation before playback
/// could begin.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadError {
    MissingHeader,
    /// A wire `CommandProto` did not decode into a `Command` (unknown
    /// opcode, malformed target position).
    MalformedCommand { tick: Tick },
    /// Ticks were not stored in strictly ascending order (§4.3 invariant:
    /// "the recorder stores ticks in strictly ascending order").
    TicksOutOfOrder { tick: Tick },
    /// A tick or checkpoint falls outside `[0, end_tick]`.
    OutOfRange { tick: Tick, end_tick: Tick },
    /// Checkpoints were not stored in ascending tick order.
    CheckpointsOutOfOrder,
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingHeader => write!(f, "replay artifact has no header"),
            Self::MalformedCommand { tick } => {
                write!(f, "malformed command at tick {tick}")
            }
            Self::TicksOutOfOrder { tick } => {
                write!(f, "tick {tick} is out of ascending order")
            }
            Self::OutOfRange { tick, end_tick } => {
                write!(f, "record at tick {tick} exceeds end_tick {end_tick}")
            }
            Self::CheckpointsOutOfOrder => write!(f, "checkpoints are not ascending by tick"),
        }
    }
}

impl std::error::Error for LoadError {}

/// Drives a loaded replay artifact tick by tick, delivering each tick's
/// commands to an installed sink callback.
///
/// `ReplayPlayer` does not run a simulation itself; call
/// [`ReplayPlayer::process_tick`] once per tick (typically driven by the
/// same tick sequence a `LockstepCoordinator` would emit `tick_ready` for)
/// and apply the delivered commands to whatever simulation instance is
/// being replayed into.
pub struct ReplayPlayer {
    header: ReplayHeader,
    by_tick: BTreeMap<Tick, Vec<Command>>,
    checkpoints: BTreeMap<Tick, u32>,
    end_tick: Tick,
    cursor: Tick,
    active: bool,
    sink: Option<Box<dyn FnMut(&Command)>>,
}

impl ReplayPlayer {
    /// Validate and load an artifact, rebuilding the `tick → hash` index for
    /// O(1) lookup. Decoding every `CommandProto` eagerly here means a
    /// malformed replay is rejected before playback starts, not midway
    /// through.
    pub fn load(artifact: ReplayArtifact) -> Result<Self, LoadError> {
        let header = artifact.header.ok_or(LoadError::MissingHeader)?;
        let end_tick = artifact.end_tick;

        let mut by_tick: BTreeMap<Tick, Vec<Command>> = BTreeMap::new();
        let mut last_tick: Option<Tick> = None;
        for record in artifact.ticks {
            if record.tick > end_tick {
                return Err(LoadError::OutOfRange {
                    tick: record.tick,
                    end_tick,
                });
            }
            if let Some(last) = last_tick
                && record.tick <= last
            {
                return Err(LoadError::TicksOutOfOrder { tick: record.tick });
            }
            last_tick = Some(record.tick);

            let commands: Result<Vec<Command>, _> =
                record.commands.into_iter().map(TryInto::try_into).collect();
            let commands = commands.map_err(|_| LoadError::MalformedCommand { tick: record.tick })?;
            by_tick.insert(record.tick, commands);
        }

        let mut checkpoints = BTreeMap::new();
        let mut last_checkpoint_tick: Option<Tick> = None;
        for checkpoint in artifact.checkpoints {
            if checkpoint.tick > end_tick {
                return Err(LoadError::OutOfRange {
                    tick: checkpoint.tick,
                    end_tick,
                });
            }
            if let Some(last) = last_checkpoint_tick
                && checkpoint.tick < last
            {
                return Err(LoadError::CheckpointsOutOfOrder);
            }
            last_checkpoint_tick = Some(checkpoint.tick);
            checkpoints.insert(checkpoint.tick, checkpoint.hash);
        }

        Ok(Self {
            header,
            by_tick,
            checkpoints,
            end_tick,
            cursor: 0,
            active: true,
            sink: None,
        })
    }

    pub fn header(&self) -> &ReplayHeader {
        &self.header
    }

    pub fn end_tick(&self) -> Tick {
        self.end_tick
    }

    /// Install the callback the player will invoke once per replayed
    /// command, in the stored order, during [`Self::process_tick`].
    pub fn set_command_sink(&mut self, sink: impl FnMut(&Command) + 'static) {
        self.sink = Some(Box::new(sink));
    }

    /// Enter playback: resets the cursor to tick 0 and marks the player
    /// active.
    pub fn start(&mut self) {
        self.cursor = 0;
        self.active = true;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Deliver every command stored at `tick` (in stored order) to the
    /// installed sink and advance the cursor past `tick`. Returns the
    /// number of commands delivered.
    ///
    /// The player never rewinds: calling this with `tick` less than the
    /// cursor's current tick is out-of-order misuse and replays nothing (the
    /// excess stored ticks between the cursor and `tick` are not
    /// re-delivered either — per §4.3, "if called with a tick less than the
    /// cursor's tick, the excess stored ticks are not re-played"). Calling
    /// it with a `tick` ahead of the next stored tick silently skips the
    /// intervening sparse gap. Becomes inactive once `tick > end_tick`.
    pub fn process_tick(&mut self, tick: Tick) -> usize {
        if tick > self.end_tick {
            self.active = false;
            return 0;
        }
        if tick < self.cursor {
            return 0;
        }
        self.cursor = tick + 1;

        let Some(commands) = self.by_tick.get(&tick) else {
            return 0;
        };
        let count = commands.len();
        if let Some(sink) = self.sink.as_mut() {
            for cmd in commands {
                sink(cmd);
            }
        }
        count
    }

    /// The recorded `SimulationHash` at `tick`, if a checkpoint was taken
    /// there.
    pub fn hash_checkpoint(&self, tick: Tick) -> Option<u32> {
        self.checkpoints.get(&tick).copied()
    }
}

// ============================================================================
// Replay verification
// ============================================================================

/// A replay failed to verify against its own recorded hash checkpoints.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyError {
    /// The artifact itself failed structural validation; verification never
    /// started.
    Invalid(LoadError),
    /// The hash produced after applying `tick`'s commands disagreed with
    /// the checkpoint recorded at that tick.
    HashMismatch { tick: Tick, expected: u32, actual: u32 },
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(e) => write!(f, "replay artifact is invalid: {e}"),
            Self::HashMismatch { tick, expected, actual } => write!(
                f,
                "replay verification failed at tick {tick}: expected hash {expected:#010x}, got {actual:#010x}"
            ),
        }
    }
}

impl std::error::Error for VerifyError {}

/// Replay `artifact` tick by tick through `advance`, which applies one
/// tick's commands to an externally owned simulation and returns that
/// simulation's `SimulationHash` afterwards. Every recorded checkpoint is
/// compared against the hash `advance` reports for that tick; the first
/// mismatch is returned.
///
/// This is supplemental to §4.3 (the distilled spec only requires lossless
/// round-trip serialization, §8) but directly supports "deterministically
/// re-execute them" (§1): a replay subsystem with no way to confirm the
/// re-execution matches is not verifying anything.
pub fn verify_replay(
    artifact: ReplayArtifact,
    mut advance: impl FnMut(Tick, &[Command]) -> u32,
) -> Result<(), VerifyError> {
    let player = ReplayPlayer::load(artifact).map_err(VerifyError::Invalid)?;

    for tick in 0..=player.end_tick {
        let commands = player.by_tick.get(&tick).cloned().unwrap_or_default();
        let actual_hash = advance(tick, &commands);
        if let Some(expected) = player.checkpoints.get(&tick)
            && *expected != actual_hash
        {
            return Err(VerifyError::HashMismatch {
                tick,
                expected: *expected,
                actual: actual_hash,
            });
        }
    }
    Ok(())
}

// ============================================================================
// Build Fingerprint Acquisition
// ============================================================================

/// Build fingerprint data, independent of its wire representation.
#[derive(Debug, Clone)]
pub struct BuildFingerprintData {
    pub binary_sha256: String,
    pub target_triple: String,
    pub profile: String,
}

/// Acquire the current build's fingerprint: a SHA-256 of this executable's
/// bytes plus its target triple and build profile. Replays record this so a
/// verification run can detect it is replaying against a different build
/// than the one that recorded the match.
pub fn acquire_build_fingerprint() -> io::Result<BuildFingerprintData> {
    let exe_path = std::env::current_exe()?;

    let mut file = fs::File::open(&exe_path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    let binary_sha256 = format!("{:x}", hasher.finalize());

    let target_triple = target_triple();
    let profile = if cfg!(debug_assertions) { "dev" } else { "release" };

    Ok(BuildFingerprintData {
        binary_sha256,
        target_triple: target_triple.to_string(),
        profile: profile.to_string(),
    })
}

fn target_triple() -> &'static str {
    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    {
        "x86_64-unknown-linux-gnu"
    }
    #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
    {
        "aarch64-unknown-linux-gnu"
    }
    #[cfg(all(target_os = "macos", target_arch = "x86_64"))]
    {
        "x86_64-apple-darwin"
    }
    #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
    {
        "aarch64-apple-darwin"
    }
    #[cfg(all(target_os = "windows", target_arch = "x86_64"))]
    {
        "x86_64-pc-windows-msvc"
    }
    #[cfg(not(any(
        all(target_os = "linux", target_arch = "x86_64"),
        all(target_os = "linux", target_arch = "aarch64"),
        all(target_os = "macos", target_arch = "x86_64"),
        all(target_os = "macos", target_arch = "aarch64"),
        all(target_os = "windows", target_arch = "x86_64"),
    )))]
    {
        "unknown-unknown-unknown"
    }
}

/// Compare a replay's recorded build fingerprint against the currently
/// running build. Mismatches are a caller decision (fail in CI, warn in
/// dev), not this function's to make.
pub fn fingerprints_match(recorded: &BuildFingerprint, current: &BuildFingerprintData) -> bool {
    recorded.binary_sha256 == current.binary_sha256
        && recorded.target_triple == current.target_triple
        && recorded.profile == current.profile
}

// ============================================================================
// Replay I/O
// ============================================================================

/// Write a replay artifact to a file. Refuses to overwrite an existing
/// file; callers that want a fresh recording must pick a fresh path.
pub fn write_replay(artifact: &ReplayArtifact, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    if path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("replay artifact already exists at {}", path.display()),
        ));
    }

    let encoded = artifact.encode_to_vec();
    let mut file = fs::File::create(path)?;
    file.write_all(&encoded)?;

    Ok(())
}

pub fn read_replay(path: &Path) -> io::Result<ReplayArtifact> {
    let data = fs::read(path)?;
    ReplayArtifact::decode(data.as_slice())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("failed to decode replay: {e}")))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_sim::CommandKind;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn sample_header() -> ReplayHeader {
        ReplayHeader {
            version: 1,
            date: "2026-07-27".into(),
            house_prefix: "ATR".into(),
            enemy_prefix: "HAR".into(),
            map_id: "dune-arena-02".into(),
            map_seed: 7,
            rng_seed: 99,
            total_players: 2,
            opponents: vec![],
            game_mode: "skirmish".into(),
            difficulty: None,
            game_speed: None,
            build_fingerprint: None,
        }
    }

    /// Mirrors spec §8 scenario 1: start → record one `Move` at tick 1 →
    /// end_tick(1) → end_tick(2) with no commands → record one `Attack` →
    /// end_tick(3) → stop.
    fn record_scenario_one() -> ReplayArtifact {
        let mut recorder = ReplayRecorder::new();
        recorder.start(sample_header());

        recorder.record_command(Command::new(CommandKind::Move, 0, vec![1]));
        recorder.end_tick(1);

        recorder.end_tick(2);

        recorder.record_command(Command::new(CommandKind::Attack, 0, vec![1]));
        recorder.end_tick(3);

        recorder.stop()
    }

    #[test]
    fn scenario_one_sparse_storage() {
        let artifact = record_scenario_one();
        assert_eq!(artifact.ticks.len(), 2);
        assert_eq!(artifact.ticks[0].tick, 1);
        assert_eq!(artifact.ticks[1].tick, 3);
        assert_eq!(artifact.end_tick, 3);
    }

    #[test]
    fn scenario_two_sink_ordering() {
        let artifact = record_scenario_one();
        let mut player = ReplayPlayer::load(artifact).unwrap();

        let sink_log: Rc<RefCell<Vec<CommandKind>>> = Rc::new(RefCell::new(Vec::new()));
        let sink_log_clone = sink_log.clone();
        player.set_command_sink(move |cmd| sink_log_clone.borrow_mut().push(cmd.kind));
        player.start();

        assert_eq!(player.process_tick(1), 1);
        assert_eq!(*sink_log.borrow(), vec![CommandKind::Move]);

        assert_eq!(player.process_tick(2), 0);
        assert_eq!(*sink_log.borrow(), vec![CommandKind::Move]);

        assert_eq!(player.process_tick(3), 1);
        assert_eq!(*sink_log.borrow(), vec![CommandKind::Move, CommandKind::Attack]);
    }

    /// Mirrors spec §8 scenario 3: a hash checkpoint at tick 25, end_tick(30).
    #[test]
    fn scenario_three_hash_checkpoint_lookup() {
        let mut recorder = ReplayRecorder::new();
        recorder.start(sample_header());
        recorder.add_hash_checkpoint(25, 0xDEAD);
        recorder.end_tick(30);
        let artifact = recorder.stop();

        let player = ReplayPlayer::load(artifact).unwrap();
        assert_eq!(player.hash_checkpoint(25), Some(0xDEAD));
        assert_eq!(player.hash_checkpoint(26), None);
    }

    #[test]
    fn recorder_ignores_calls_before_start_and_after_stop() {
        let mut recorder = ReplayRecorder::new();
        recorder.record_command(Command::new(CommandKind::Move, 0, vec![1]));
        recorder.end_tick(1);
        assert!(!recorder.is_recording());

        recorder.start(sample_header());
        recorder.record_command(Command::new(CommandKind::Move, 0, vec![1]));
        recorder.end_tick(1);
        let artifact = recorder.stop();
        assert_eq!(artifact.ticks.len(), 1);

        // Calls after `stop` are no-ops; the recorder is idle again.
        recorder.record_command(Command::new(CommandKind::Attack, 0, vec![1]));
        recorder.end_tick(2);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn process_tick_never_rewinds() {
        let artifact = record_scenario_one();
        let mut player = ReplayPlayer::load(artifact).unwrap();
        player.start();

        assert_eq!(player.process_tick(3), 1);
        // Rewinding to an already-passed tick replays nothing.
        assert_eq!(player.process_tick(1), 0);
    }

    #[test]
    fn process_tick_skips_sparse_gaps_when_jumping_forward() {
        let artifact = record_scenario_one();
        let mut player = ReplayPlayer::load(artifact).unwrap();
        player.start();

        // Jumping straight to tick 3 skips tick 1's stored commands.
        assert_eq!(player.process_tick(3), 1);
    }

    #[test]
    fn becomes_inactive_past_end_tick() {
        let artifact = record_scenario_one();
        let mut player = ReplayPlayer::load(artifact).unwrap();
        player.start();
        assert!(player.is_active());
        assert_eq!(player.process_tick(4), 0);
        assert!(!player.is_active());
    }

    #[test]
    fn ticks_out_of_order_are_rejected_at_load() {
        let artifact = ReplayArtifact {
            header: Some(sample_header()),
            ticks: vec![
                TickCommands { tick: 3, commands: vec![] },
                TickCommands { tick: 1, commands: vec![] },
            ],
            checkpoints: vec![],
            end_tick: 5,
        };
        let result = ReplayPlayer::load(artifact);
        assert!(matches!(result, Err(LoadError::TicksOutOfOrder { tick: 1 })));
    }

    #[test]
    fn out_of_range_tick_is_rejected_at_load() {
        let mut artifact = record_scenario_one();
        artifact.ticks.push(TickCommands { tick: 999, commands: vec![] });
        let result = ReplayPlayer::load(artifact);
        assert!(matches!(result, Err(LoadError::OutOfRange { .. })));
    }

    #[test]
    fn missing_header_is_rejected_at_load() {
        let artifact = ReplayArtifact {
            header: None,
            ticks: vec![],
            checkpoints: vec![],
            end_tick: 0,
        };
        assert_eq!(ReplayPlayer::load(artifact), Err(LoadError::MissingHeader));
    }

    #[test]
    fn verify_replay_detects_hash_mismatch() {
        let mut recorder = ReplayRecorder::new();
        recorder.start(sample_header());
        recorder.add_hash_checkpoint(0, 0xAAAA);
        recorder.end_tick(0);
        let artifact = recorder.stop();

        let result = verify_replay(artifact, |_, _| 0xBBBB);
        assert_eq!(
            result,
            Err(VerifyError::HashMismatch { tick: 0, expected: 0xAAAA, actual: 0xBBBB })
        );
    }

    #[test]
    fn verify_replay_passes_when_hashes_agree() {
        let mut recorder = ReplayRecorder::new();
        recorder.start(sample_header());
        recorder.add_hash_checkpoint(0, 0xAAAA);
        recorder.end_tick(0);
        let artifact = recorder.stop();

        let result = verify_replay(artifact, |_, _| 0xAAAA);
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn write_then_read_round_trips_through_a_file() {
        let artifact = record_scenario_one();
        let dir = std::env::temp_dir().join(format!("lockstep-replay-test-{:?}", std::thread::current().id()));
        let _ = fs::remove_dir_all(&dir);
        let path = dir.join("match.replay");

        write_replay(&artifact, &path).unwrap();
        let read_back = read_replay(&path).unwrap();
        assert_eq!(artifact, read_back);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn write_refuses_to_overwrite_existing_file() {
        let artifact = record_scenario_one();
        let dir = std::env::temp_dir().join(format!("lockstep-replay-overwrite-{:?}", std::thread::current().id()));
        let _ = fs::remove_dir_all(&dir);
        let path = dir.join("match.replay");

        write_replay(&artifact, &path).unwrap();
        let result = write_replay(&artifact, &path);
        assert!(result.is_err());

        fs::remove_dir_all(&dir).unwrap();
    }
}
