use homelink_frame::PreambleWidth;
use homelink_transport::{TcpTransport, Transport, TransportConfig, TransportEvent};
use tokio::sync::broadcast;

use crate::cmd::{parse_duration, WatchArgs};
use crate::exit::{CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_transport_event, OutputFormat};

pub async fn run(args: WatchArgs, format: OutputFormat) -> CliResult<i32> {
    let keep_alive = parse_duration(&args.keep_alive)?;
    let preamble = PreambleWidth::from_bytes(args.preamble).ok_or_else(|| {
        CliError::new(
            USAGE,
            format!("unsupported preamble width: {} (use 1, 2 or 4)", args.preamble),
        )
    })?;

    let mut cfg = TransportConfig::new(args.addr.clone());
    cfg.preamble = preamble;
    cfg.keep_alive = keep_alive;

    let transport = TcpTransport::new(cfg);
    let mut events = transport.events();
    transport.connect();

    let mut printed_frames = 0usize;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let is_frame = matches!(event, TransportEvent::Frame(_));
                    if is_frame || !args.frames_only {
                        print_transport_event(&args.addr, &event, format);
                    }
                    if is_frame {
                        printed_frames = printed_frames.saturating_add(1);
                        if let Some(count) = args.count {
                            if printed_frames >= count {
                                transport.disconnect();
                                return Ok(SUCCESS);
                            }
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(CliError::new(FAILURE, "transport stopped unexpectedly"));
                }
            },
            _ = tokio::signal::ctrl_c() => {
                transport.disconnect();
                return Ok(SUCCESS);
            }
        }
    }
}
