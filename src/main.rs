pub(crate) use clap::Parser;
use kmcp::{configuration::Configuration, crds::MCPServer};
use kube::CustomResourceExt;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

const LOG_FILE_NAME: &str = "kmcp.log";
const DEFAULT_OTLP_ENDPOINT: &str = "http://127.0.0.1:4317";
const OTLP_EXPORT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);

/// Flushes the log file writer when dropped, so it lives as long as `main`.
struct LogGuard(#[allow(dead_code)] WorkerGuard);

/// Runs the MCPServer controller: every MCPServer becomes an agentgateway Deployment, Service and ConfigMap.
#[derive(Parser, Debug)]
#[command(name = "kmcp", version, long_about = None)]
struct CommandArgs {
    /// YAML file with the controller name, watched namespace, gateway image and reconcile tuning
    #[arg(long, value_name = "FILE", required_unless_present = "print_crd")]
    with_config_file: Option<String>,
    /// Write the MCPServer CustomResourceDefinition as YAML to stdout and exit
    #[arg(long)]
    print_crd: bool,
}

fn env_filter(variable: &str, default: &str) -> EnvFilter {
    EnvFilter::new(std::env::var(variable).unwrap_or_else(|_| default.to_owned()))
}

/// Console and `kmcp.log` always; span export over OTLP when `enable_open_telemetry` is set.
///
/// `RUST_LOG`, `RUST_FILE_LOG` and `RUST_TRACE_LOG` filter the three outputs. `OTEL_EXPORTER_OTLP_ENDPOINT` moves the
/// collector away from localhost.
fn init_logging(configuration: &Configuration) -> kmcp::Result<LogGuard> {
    let (file_writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(".", LOG_FILE_NAME));

    let console_layer = fmt::layer()
        .event_format(fmt::format().compact())
        .with_target(true)
        .with_span_events(FmtSpan::NONE)
        .with_ansi(false)
        .with_filter(filter::filter_fn(|meta| !meta.is_span()))
        .with_filter(env_filter("RUST_LOG", "info"));

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_span_events(FmtSpan::NONE)
        .with_target(true)
        .with_ansi(false)
        .with_filter(filter::filter_fn(|meta| !meta.is_span()))
        .with_filter(env_filter("RUST_FILE_LOG", "debug"));

    let registry = Registry::default().with(console_layer).with(file_layer);
    if configuration.enable_open_telemetry != Some(true) {
        registry.init();
        return Ok(LogGuard(guard));
    }

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or_else(|_| DEFAULT_OTLP_ENDPOINT.to_owned());
    let exporter = opentelemetry_otlp::SpanExporter::builder().with_tonic().with_endpoint(endpoint).with_timeout(OTLP_EXPORT_TIMEOUT).build()?;
    let service_name = configuration.controller_name.clone();
    let tracer = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_id_generator(RandomIdGenerator::default())
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(opentelemetry_sdk::Resource::builder().with_attributes(vec![opentelemetry::KeyValue::new("service.name", service_name.clone())]).build())
        .build()
        .tracer(service_name);

    registry.with(tracing_opentelemetry::layer().with_tracer(tracer).with_filter(env_filter("RUST_TRACE_LOG", "info"))).init();
    Ok(LogGuard(guard))
}

#[allow(clippy::print_stdout)]
#[tokio::main(flavor = "multi_thread")]
async fn main() -> kmcp::Result<()> {
    let args = CommandArgs::parse();
    if args.print_crd {
        print!("{}", serde_yaml::to_string(&MCPServer::crd())?);
        return Ok(());
    }
    let Some(config_file) = args.with_config_file else {
        return Err("--with-config-file is required".into());
    };

    let configuration: Configuration = serde_yaml::from_str(&std::fs::read_to_string(config_file)?)?;
    configuration.validate()?;
    let _guard = init_logging(&configuration)?;

    kmcp::start(configuration).await
}
