use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

const SPINNER_TEMPLATE: &str = "{prefix:.bold} {spinner:.magenta} {msg:.bold} [{elapsed_precise}]";

/// Runs `f` behind a stderr spinner labelled `prefix`/`msg`. With `enabled`
/// false nothing is drawn.
pub fn with_spinner<T>(enabled: bool, prefix: &str, msg: &str, f: impl FnOnce() -> T) -> T {
    if !enabled {
        return f();
    }
    let style = ProgressStyle::with_template(SPINNER_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr_with_hz(15));
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));

    let out = f();
    pb.finish_with_message(format!("{msg} done"));
    out
}
