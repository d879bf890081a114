use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time;

use super::collector::Collect;
use super::config::Config;

// The monitor runs atom collections in the background. Threads only raise a
// request once the table outgrows its margin, the monitor picks the request
// up on its next wake and lets the collector decide whether it is still
// worth a cycle.
pub struct Monitor<T: Collect + Send + Sync + 'static> {
    collector: Arc<T>,

    flag: AtomicBool,
    monitor_lock: Mutex<()>,

    // config vars
    wait_duration: u64,
}

impl<T: Collect + Send + Sync + 'static> Monitor<T> {
    pub fn new(collector: Arc<T>, config: &Config) -> Self {
        Self {
            collector,
            flag: AtomicBool::new(false),
            monitor_lock: Mutex::new(()),
            wait_duration: config.monitor_wait_time,
        }
    }

    /// Blocks until the monitor thread has exited.
    pub fn stop(&self) {
        self.flag.store(false, Ordering::Relaxed);
        let _lock = self.monitor_lock.lock().unwrap();
    }

    pub fn is_running(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn start(self: Arc<Self>) {
        if self
            .flag
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        std::thread::spawn(move || self.monitor());
    }

    fn monitor(&self) {
        let _lock = self.monitor_lock.lock().unwrap();

        loop {
            self.sleep();

            if self.should_stop_monitoring() {
                break;
            }

            self.test_triggers();
        }
    }

    fn test_triggers(&self) {
        if self.collector.collection_requested() {
            self.collector.maybe_collect();
        }
    }

    fn should_stop_monitoring(&self) -> bool {
        !self.flag.load(Ordering::Relaxed)
    }

    fn sleep(&self) {
        let duration = time::Duration::from_millis(self.wait_duration);

        thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{CollectOutcome, GcState};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        requested: AtomicBool,
        collections: AtomicUsize,
    }

    impl Collect for Counting {
        fn collect(&self) -> CollectOutcome {
            self.collections.fetch_add(1, Ordering::SeqCst);
            CollectOutcome::Collected(0)
        }

        fn maybe_collect(&self) -> CollectOutcome {
            self.requested.store(false, Ordering::SeqCst);
            self.collect()
        }

        fn collection_requested(&self) -> bool {
            self.requested.load(Ordering::SeqCst)
        }

        fn get_collections(&self) -> usize {
            self.collections.load(Ordering::SeqCst)
        }

        fn get_collect_avg_time(&self) -> usize {
            0
        }

        fn get_state(&self) -> GcState {
            GcState::Idle
        }
    }

    fn config() -> Config {
        Config {
            monitor_wait_time: 1,
            ..Config::default()
        }
    }

    #[test]
    fn runs_requested_collections() {
        let collector = Arc::new(Counting::default());
        let monitor = Arc::new(Monitor::new(collector.clone(), &config()));

        monitor.clone().start();
        collector.requested.store(true, Ordering::SeqCst);

        while collector.get_collections() == 0 {
            thread::sleep(time::Duration::from_millis(1));
        }

        monitor.stop();
        assert!(!monitor.is_running());
        assert_eq!(collector.get_collections(), 1);
    }

    #[test]
    fn idle_without_requests() {
        let collector = Arc::new(Counting::default());
        let monitor = Arc::new(Monitor::new(collector.clone(), &config()));

        monitor.clone().start();
        // starting twice is a no op
        monitor.clone().start();
        thread::sleep(time::Duration::from_millis(20));
        monitor.stop();

        assert_eq!(collector.get_collections(), 0);
    }
}
