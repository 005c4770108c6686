use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use homelink_device::{raw_codec, Device, MessageSet, Value};
use homelink_frame::PreambleWidth;
use homelink_transport::{TcpTransport, Transport, TransportConfig};

use crate::cmd::{parse_duration, parse_hex, SendArgs};
use crate::exit::{device_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_response, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let call_timeout = parse_duration(&args.timeout)?;
    let connect_timeout = parse_duration(&args.connect_timeout)?;
    let keep_alive = parse_duration(&args.keep_alive)?;
    let preamble = PreambleWidth::from_bytes(args.preamble).ok_or_else(|| {
        CliError::new(
            USAGE,
            format!("unsupported preamble width: {} (use 1, 2 or 4)", args.preamble),
        )
    })?;

    let head = parse_hex(&args.head)?;
    let tail = parse_hex(&args.tail)?;
    let data = parse_hex(&args.data)?;
    let ident = args.ident.as_deref().map(parse_hex).transpose()?;

    let mut cfg = TransportConfig::new(args.addr.clone());
    cfg.preamble = preamble;
    cfg.keep_alive = keep_alive;
    cfg.identifier_len = ident.as_ref().map_or(0, Vec::len);

    let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(cfg));
    transport.connect();

    let mut connected = transport.watch_connected();
    tokio::time::timeout(connect_timeout, connected.wait_for(|up| *up))
        .await
        .map_err(|_| {
            CliError::new(
                TIMEOUT,
                format!("{} unreachable within {}", args.addr, args.connect_timeout),
            )
        })?
        .map_err(|_| CliError::new(crate::exit::INTERNAL, "transport stopped while connecting"))?;

    let mut set = MessageSet::new();
    set.register(
        raw_codec("raw")
            .head(head)
            .tail(tail)
            .timeout(call_timeout),
    )
    .map_err(|err| device_error("message registration failed", err))?;

    let device = Device::bind(transport.clone(), ident.as_deref(), set)
        .map_err(|err| device_error("device bind failed", err))?;

    let started = Instant::now();
    let response = device
        .request("raw", Value::Bytes(Bytes::from(data)))
        .await
        .map_err(|err| device_error("request failed", err))?;
    let elapsed = started.elapsed();

    let body = match &response {
        Value::Bytes(body) => body.as_ref(),
        _ => &[],
    };
    print_response(&args.addr, body, elapsed, format);

    transport.disconnect();
    Ok(SUCCESS)
}
