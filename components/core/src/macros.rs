/// Emit an info-level log line prefixed with a command's identifier.
///
/// Mirrors the teacher's `outputln!(preamble name, "...", args)` convention
/// (see `habitat-launcher::server::ServiceTable::kill_all` and
/// `habitat_sup::manager::service::supervisor::Supervisor::start`): every
/// line a command produces is tagged with which command it came from so a
/// multiplexed master log stays readable.
#[macro_export]
macro_rules! outputln {
    (preamble $id:expr, $fmt:expr) => {
        log::info!(concat!("{}: ", $fmt), $id)
    };
    (preamble $id:expr, $fmt:expr, $($arg:tt)*) => {
        log::info!(concat!("{}: ", $fmt), $id, $($arg)*)
    };
}
