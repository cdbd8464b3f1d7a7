use std::collections::HashMap;

use chrono::Local;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::WatchError;
use crate::event::{Event, Op};
use crate::gamelist::Game;
use crate::process_table::ProcessTable;
use crate::system::System;

/// Channels are bounded so a slow consumer holds the monitor back instead of
/// events piling up.
const CHANNEL_CAPACITY: usize = 1;

/// Timing of the monitor loop.
#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    /// Time between process table scans.
    pub tick_interval: Duration,
    /// How long a process that matched no system is left unread.
    pub debounce_window: Duration,
}

/// Handle to a running process monitor.
///
/// Both `events` and `errors` must be drained; the monitor waits on whichever
/// is full. They close once the monitor has stopped.
pub struct Watcher {
    pub events: mpsc::Receiver<Event>,
    pub errors: mpsc::Receiver<WatchError>,
    /// Setting this to `true` asks the monitor to stop.
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Watcher {
    /// Spawns the monitor for `systems`, tried in order for every process.
    pub fn spawn<T>(systems: Vec<System>, table: T, settings: WatchSettings) -> Self
    where
        T: ProcessTable + 'static,
    {
        let (event_tx, events) = mpsc::channel(CHANNEL_CAPACITY);
        let (error_tx, errors) = mpsc::channel(CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);

        let monitor = Monitor {
            systems,
            table,
            settings,
            event_tx,
            error_tx,
            stop_rx,
            running: None,
            last: None,
            skipped: HashMap::new(),
        };
        let handle = tokio::spawn(monitor.run());

        Self {
            events,
            errors,
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Stops the monitor and waits for it to finish. Calling it again is a
    /// no-op.
    pub async fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.stop_tx.send(true);
        let _ = handle.await;
    }
}

/// State owned by the monitor task.
struct Monitor<T> {
    systems: Vec<System>,
    table: T,
    settings: WatchSettings,
    event_tx: mpsc::Sender<Event>,
    error_tx: mpsc::Sender<WatchError>,
    stop_rx: watch::Receiver<bool>,
    /// Pid of the emulator currently running a game.
    running: Option<u32>,
    /// Last event sent, replayed as `Stop` when `running` exits.
    last: Option<Event>,
    /// Pids that matched no system, with when they were last read.
    skipped: HashMap<u32, Instant>,
}

impl<T: ProcessTable> Monitor<T> {
    async fn run(mut self) {
        let mut ticker = interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.stop_rx.changed() => break,
            }
            if *self.stop_rx.borrow() {
                break;
            }
            if !self.tick().await {
                break;
            }
        }
        debug!(target: "monitor", "stopped");
        // Dropping `self` closes both channels.
    }

    /// Runs one liveness check and scan. Returns `false` once the monitor
    /// should stop.
    async fn tick(&mut self) -> bool {
        let now = Instant::now();

        if let Some(pid) = self.running {
            if self.table.is_alive(pid) {
                return true;
            }
            self.running = None;
            if let Some(last) = self.last.take() {
                let stop = last.stopped_at(Local::now());
                info!(target: "monitor", pid, system = %stop.system.name, rom = %stop.game.path, "exited");
                self.last = Some(stop.clone());
                if !self.send_event(stop).await {
                    return false;
                }
            }
        }

        let window = self.settings.debounce_window;
        self.skipped.retain(|_, seen| now.duration_since(*seen) < window);

        let pids = match self.table.pids() {
            Ok(pids) => pids,
            Err(e) => return self.send_error(e).await,
        };

        for pid in pids {
            if self.skipped.contains_key(&pid) {
                continue;
            }
            let cmdline = match self.table.cmdline(pid) {
                Ok(cmdline) => cmdline,
                Err(e) => {
                    if !self.send_error(e).await {
                        return false;
                    }
                    continue;
                }
            };

            let Some(event) = self.correlate(&cmdline) else {
                self.skipped.insert(pid, now);
                continue;
            };
            info!(
                target: "monitor",
                pid,
                system = %event.system.name,
                rom = %event.game.path,
                "detected"
            );
            self.running = Some(pid);
            self.last = Some(event.clone());
            return self.send_event(event).await;
        }
        true
    }

    /// Builds a `Start` event for the first system whose command matches.
    fn correlate(&self, cmdline: &[u8]) -> Option<Event> {
        let (system, rom) = self
            .systems
            .iter()
            .find_map(|s| s.match_command(cmdline).map(|rom| (s, rom)))?;

        let game = system.game(&rom).unwrap_or_else(|e| {
            debug!(target: "monitor", system = %system.info().name, "no metadata: {e}");
            Game::fallback(&rom)
        });
        Some(Event {
            op: Op::Start,
            time: Local::now(),
            system: system.info().clone(),
            game,
        })
    }

    async fn send_event(&mut self, event: Event) -> bool {
        deliver(&self.event_tx, &mut self.stop_rx, event).await
    }

    async fn send_error(&mut self, err: WatchError) -> bool {
        deliver(&self.error_tx, &mut self.stop_rx, err).await
    }
}

/// Sends `value`, giving up if the receiver is gone or a stop is requested
/// while waiting for room.
///
/// A value still pending here is only dropped after `close()` was called.
async fn deliver<V>(tx: &mpsc::Sender<V>, stop_rx: &mut watch::Receiver<bool>, value: V) -> bool {
    tokio::select! {
        sent = tx.send(value) => sent.is_ok(),
        _ = stop_rx.changed() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use crate::config::SystemConfig;

    const SNES_CMDLINE: &str = "bash\0-c\0retroarch -L core.so /home/pi/roms/snes/Game.sfc\0";

    /// In-memory process table shared with the test body.
    #[derive(Clone, Default)]
    struct FakeTable {
        inner: Arc<Mutex<FakeState>>,
    }

    #[derive(Default)]
    struct FakeState {
        processes: BTreeMap<u32, String>,
        /// Whether the next listing fails.
        listing_broken: bool,
        /// Pids whose next read fails.
        broken: Vec<u32>,
        reads: HashMap<u32, usize>,
    }

    impl FakeTable {
        fn spawn(&self, pid: u32, cmdline: &str) {
            self.inner.lock().unwrap().processes.insert(pid, cmdline.to_string());
        }

        fn kill(&self, pid: u32) {
            self.inner.lock().unwrap().processes.remove(&pid);
        }

        fn break_once(&self, pid: u32) {
            self.inner.lock().unwrap().broken.push(pid);
        }

        fn break_listing_once(&self) {
            self.inner.lock().unwrap().listing_broken = true;
        }

        fn reads(&self, pid: u32) -> usize {
            self.inner.lock().unwrap().reads.get(&pid).copied().unwrap_or(0)
        }
    }

    impl ProcessTable for FakeTable {
        fn pids(&mut self) -> crate::error::Result<Vec<u32>> {
            let mut state = self.inner.lock().unwrap();
            if std::mem::take(&mut state.listing_broken) {
                return Err(WatchError::ProcessRead {
                    target: "/proc".to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
                });
            }
            Ok(state.processes.keys().copied().collect())
        }

        fn cmdline(&mut self, pid: u32) -> crate::error::Result<Vec<u8>> {
            let mut state = self.inner.lock().unwrap();
            *state.reads.entry(pid).or_default() += 1;
            if let Some(i) = state.broken.iter().position(|&p| p == pid) {
                state.broken.remove(i);
                return Err(WatchError::ProcessRead {
                    target: format!("/proc/{pid}/cmdline"),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
                });
            }
            Ok(state.processes.get(&pid).cloned().unwrap_or_default().into_bytes())
        }

        fn is_alive(&mut self, pid: u32) -> bool {
            self.inner.lock().unwrap().processes.contains_key(&pid)
        }
    }

    fn system(name: &str, command: &str, gamelist: Option<PathBuf>) -> System {
        let config = SystemConfig {
            name: name.to_string(),
            full_name: name.to_uppercase(),
            path: format!("~/roms/{name}"),
            platform: name.to_string(),
            command: command.to_string(),
        };
        System::with_gamelist(config, Path::new("/home/pi"), gamelist).unwrap()
    }

    fn settings() -> WatchSettings {
        WatchSettings {
            tick_interval: Duration::from_secs(1),
            debounce_window: Duration::from_secs(60),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_then_stop_when_process_exits() {
        let table = FakeTable::default();
        table.spawn(1, "/sbin/init\0");
        table.spawn(100, SNES_CMDLINE);

        let systems = vec![system("snes", "retroarch -L core.so %ROM%", None)];
        let mut watcher = Watcher::spawn(systems, table.clone(), settings());

        let start = watcher.events.recv().await.unwrap();
        assert_eq!(start.op, Op::Start);
        assert_eq!(start.system.name, "snes");
        assert_eq!(start.system.full_name, "SNES");
        assert_eq!(start.system.path, "/home/pi/roms/snes");
        assert_eq!(start.game, Game::fallback("/home/pi/roms/snes/Game.sfc"));

        table.kill(100);
        let stop = watcher.events.recv().await.unwrap();
        assert_eq!(stop.op, Op::Stop);
        assert_eq!(stop.system, start.system);
        assert_eq!(stop.game, start.game);
        assert!(stop.time >= start.time);

        watcher.close().await;
        assert!(watcher.events.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn start_carries_gamelist_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let gamelist = dir.path().join("gamelist.xml");
        std::fs::write(
            &gamelist,
            "<gameList><game><path>./Game.sfc</path><name>The Game</name></game></gameList>",
        )
        .unwrap();

        let table = FakeTable::default();
        table.spawn(100, SNES_CMDLINE);
        let systems = vec![system("snes", "retroarch -L core.so %ROM%", Some(gamelist))];
        let mut watcher = Watcher::spawn(systems, table, settings());

        let start = watcher.events.recv().await.unwrap();
        assert_eq!(start.game.title, "The Game");
        assert_eq!(start.game.path, dir.path().join("Game.sfc").to_string_lossy());
        watcher.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_configured_system_wins() {
        let table = FakeTable::default();
        table.spawn(100, "bash\0-c\0emu /roms/a.sfc\0");

        let systems = vec![system("first", "emu %ROM%", None), system("second", "emu %ROM_RAW%", None)];
        let mut watcher = Watcher::spawn(systems, table.clone(), settings());
        assert_eq!(watcher.events.recv().await.unwrap().system.name, "first");
        watcher.close().await;

        let systems = vec![system("second", "emu %ROM_RAW%", None), system("first", "emu %ROM%", None)];
        let mut watcher = Watcher::spawn(systems, table, settings());
        assert_eq!(watcher.events.recv().await.unwrap().system.name, "second");
        watcher.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_game_is_tracked_at_a_time() {
        let table = FakeTable::default();
        table.spawn(100, SNES_CMDLINE);
        table.spawn(200, "bash\0-c\0retroarch -L core.so /home/pi/roms/snes/Other.sfc\0");

        let systems = vec![system("snes", "retroarch -L core.so %ROM%", None)];
        let mut watcher = Watcher::spawn(systems, table.clone(), settings());

        let first = watcher.events.recv().await.unwrap();
        assert_eq!(first.game.path, "/home/pi/roms/snes/Game.sfc");

        // While 100 runs, 200 is never looked at.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(table.reads(200), 0);

        table.kill(100);
        let stop = watcher.events.recv().await.unwrap();
        assert_eq!(stop.op, Op::Stop);
        assert_eq!(stop.game, first.game);

        // The scan in the same tick picks up the other emulator.
        let next = watcher.events.recv().await.unwrap();
        assert_eq!(next.op, Op::Start);
        assert_eq!(next.game.path, "/home/pi/roms/snes/Other.sfc");
        watcher.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unmatched_process_is_not_reread_within_debounce_window() {
        let table = FakeTable::default();
        table.spawn(7, "sleep\0infinity\0");

        let systems = vec![system("snes", "retroarch -L core.so %ROM%", None)];
        let mut watcher = Watcher::spawn(systems, table.clone(), settings());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(table.reads(7), 1);

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(table.reads(7), 2);

        watcher.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_process_that_becomes_an_emulator_is_found_after_window() {
        let table = FakeTable::default();
        table.spawn(100, "bash\0");

        let systems = vec![system("snes", "retroarch -L core.so %ROM%", None)];
        let mut watcher = Watcher::spawn(systems, table.clone(), settings());

        tokio::time::sleep(Duration::from_secs(5)).await;
        table.spawn(100, SNES_CMDLINE);

        let start = watcher.events.recv().await.unwrap();
        assert_eq!(start.game.path, "/home/pi/roms/snes/Game.sfc");
        assert_eq!(table.reads(100), 2);
        watcher.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn read_errors_are_reported_and_scanning_continues() {
        let table = FakeTable::default();
        table.spawn(5, "bash\0");
        table.spawn(100, SNES_CMDLINE);
        table.break_once(5);

        let systems = vec![system("snes", "retroarch -L core.so %ROM%", None)];
        let mut watcher = Watcher::spawn(systems, table, settings());

        let err = watcher.errors.recv().await.unwrap();
        assert!(matches!(err, WatchError::ProcessRead { ref target, .. } if target == "/proc/5/cmdline"));

        let start = watcher.events.recv().await.unwrap();
        assert_eq!(start.op, Op::Start);
        watcher.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn listing_errors_are_reported_and_next_tick_scans_again() {
        let table = FakeTable::default();
        table.spawn(100, SNES_CMDLINE);
        table.break_listing_once();

        let systems = vec![system("snes", "retroarch -L core.so %ROM%", None)];
        let mut watcher = Watcher::spawn(systems, table.clone(), settings());

        let err = watcher.errors.recv().await.unwrap();
        assert!(matches!(err, WatchError::ProcessRead { ref target, .. } if target == "/proc"));
        assert_eq!(table.reads(100), 0);

        let start = watcher.events.recv().await.unwrap();
        assert_eq!(start.op, Op::Start);
        assert_eq!(start.game.path, "/home/pi/roms/snes/Game.sfc");
        watcher.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_rom_falls_through_to_the_next_system() {
        let table = FakeTable::default();
        table.spawn(100, "bash\0-c\0emu \\\0");

        let systems = vec![system("escaped", "emu %ROM%", None), system("raw", "emu %ROM_RAW%", None)];
        let mut watcher = Watcher::spawn(systems, table, settings());

        let start = watcher.events.recv().await.unwrap();
        assert_eq!(start.system.name, "raw");
        assert_eq!(start.game.path, "\\");
        watcher.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent_and_closes_both_streams() {
        let table = FakeTable::default();
        let systems = vec![system("snes", "retroarch -L core.so %ROM%", None)];
        let mut watcher = Watcher::spawn(systems, table, settings());

        tokio::time::sleep(Duration::from_secs(3)).await;
        watcher.close().await;
        watcher.close().await;

        assert!(watcher.events.recv().await.is_none());
        assert!(watcher.errors.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn close_does_not_wait_for_an_unread_event() {
        let table = FakeTable::default();
        table.spawn(100, SNES_CMDLINE);
        table.spawn(200, "bash\0-c\0retroarch -L core.so /home/pi/roms/snes/Other.sfc\0");

        let systems = vec![system("snes", "retroarch -L core.so %ROM%", None)];
        let mut watcher = Watcher::spawn(systems, table.clone(), settings());

        // Fill the channel with the Start, then make the monitor block on the
        // Stop and the following Start.
        tokio::time::sleep(Duration::from_secs(2)).await;
        table.kill(100);
        tokio::time::sleep(Duration::from_secs(2)).await;

        watcher.close().await;
        let start = watcher.events.recv().await.unwrap();
        assert_eq!(start.op, Op::Start);
    }

    #[tokio::test(start_paused = true)]
    async fn inert_system_never_matches() {
        let table = FakeTable::default();
        table.spawn(100, "bash\0-c\0/home/pi/roms/kodi/kodi.sh\0");

        let systems = vec![system("kodi", "%ROM%", None)];
        let mut watcher = Watcher::spawn(systems, table.clone(), settings());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(watcher.events.try_recv().is_err());
        assert_eq!(table.reads(100), 1);
        watcher.close().await;
    }
}
