use std::sync::Arc;

use lamb_fabric::consumer::DEFAULT_IDLE;
use lamb_fabric::{spawn_consumer, spawn_reporter, Broker, Fabric, SessionTicket, TracingSink};
use tracing::{info, warn};

use crate::cmd::{parse_duration, ServeArgs};
use crate::exit::{fabric_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_listening, OutputFormat};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.fabric_config()?;
    let report_interval = parse_duration(&args.report_interval)?;

    let fabric = Arc::new(Fabric::new(config));
    install_ctrlc_handler(Arc::clone(&fabric))?;

    let broker = Broker::bind(Arc::clone(&fabric))
        .map(Arc::new)
        .map_err(|err| fabric_error("bind failed", err))?;
    print_listening(broker.local_addr(), format);

    let mut consumers = Vec::new();
    for lane in fabric.router().lanes() {
        let queue = lane.name();
        let consumer = spawn_consumer(
            Arc::clone(&lane.sessions),
            fabric.pacer_handle(),
            DEFAULT_IDLE,
            move |ticket: SessionTicket| {
                info!(
                    queue,
                    session = %ticket.session,
                    client_id = ticket.client_id,
                    port = ticket.port,
                    "session ticket taken"
                );
            },
        )
        .map_err(|err| fabric_error("consumer start failed", err))?;
        consumers.push(consumer);
    }

    let reporter = spawn_reporter(Arc::clone(&fabric), Arc::new(TracingSink), report_interval)
        .map_err(|err| fabric_error("telemetry start failed", err))?;

    broker.run();
    fabric.shutdown();

    for consumer in consumers {
        if consumer.join().is_err() {
            warn!("ticket consumer panicked");
        }
    }
    if reporter.join().is_err() {
        warn!("telemetry reporter panicked");
    }

    Ok(SUCCESS)
}

fn install_ctrlc_handler(fabric: Arc<Fabric>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        fabric.shutdown();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
