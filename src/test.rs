//! Test utilities.

pub mod fixtures;

pub mod logger {
    //! A plain logger for tests. Initialisation is idempotent; the first
    //! caller wins.

    use log::{Level, Log, Metadata, Record};

    struct Logger {
        level: Level,
    }

    impl Log for Logger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= self.level
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                println!("{:<5} {:<6} {}", record.level(), record.target(), record.args());
            }
        }

        fn flush(&self) {}
    }

    /// Initialize a new test logger.
    pub fn init(level: Level) {
        let logger = Logger { level };

        if log::set_boxed_logger(Box::new(logger)).is_ok() {
            log::set_max_level(level.to_level_filter());
        }
    }
}
