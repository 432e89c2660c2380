use slog::{Drain, Logger};

lazy_static! {
    static ref ROOT_LOGGER: Logger = {
        let decorator = slog_term::TermDecorator::new().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        Logger::root(drain, o!())
    };
}

/// The process-wide root logger. Components derive child loggers from it
/// with their own key-value context, e.g. `get_root_logger().new(o!("id" => id))`.
pub fn get_root_logger() -> &'static Logger {
    &ROOT_LOGGER
}
