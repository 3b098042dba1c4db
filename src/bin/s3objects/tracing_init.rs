// Installs the tracing subscriber of the CLI binary.
//
// Logs go to stderr: stdout carries the JSON listing of `s3objects ls`.

use std::env;
use std::io::IsTerminal;

use tracing_subscriber::fmt::format::FmtSpan;

use s3objects_rs::config::TracingConfig;

const EVENT_FILTER_ENV_VAR: &str = "RUST_LOG";
const AWS_SDK_TARGETS: [&str; 3] = ["aws_smithy_runtime", "aws_config", "aws_sigv4"];

fn build_event_filter(config: &TracingConfig, env_filter: Option<String>) -> (String, bool) {
    let tracing_level = config.tracing_level;
    let crate_filter = format!("s3objects_rs={tracing_level},s3objects={tracing_level}");

    if config.aws_sdk_tracing {
        let sdk_filter = AWS_SDK_TARGETS
            .iter()
            .map(|target| format!("{target}={tracing_level}"))
            .collect::<Vec<_>>()
            .join(",");
        return (format!("{crate_filter},{sdk_filter}"), true);
    }

    match env_filter {
        Some(filter) => (filter, true),
        None => (crate_filter, false),
    }
}

pub fn init_tracing(config: &TracingConfig) {
    let fmt_span = if config.span_events_tracing {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let (event_filter, show_target) =
        build_event_filter(config, env::var(EVENT_FILTER_ENV_VAR).ok());

    let subscriber_builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .compact()
        .with_ansi(!config.disable_color_tracing && std::io::stderr().is_terminal())
        .with_span_events(fmt_span)
        .with_env_filter(event_filter)
        .with_target(show_target);

    if config.json_tracing {
        subscriber_builder.json().init();
    } else {
        subscriber_builder.init();
    }
}
