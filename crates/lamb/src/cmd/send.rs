use std::fs;

use lamb_fabric::{pad_record, HelloRequest, SessionClient};
use lamb_frame::Command;

use crate::cmd::SendArgs;
use crate::exit::{fabric_error, io_error, CliResult, SUCCESS};
use crate::output::{print_sent, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.target.client_config(args.record_size)?;
    let body = resolve_body(&args)?;
    // Size problems are reported before any session is allocated.
    let record = pad_record(&body, config.record_size)
        .map_err(|err| fabric_error("record rejected", err))?;

    let request = HelloRequest::new(args.target.id, args.target.client_type);
    request
        .validate()
        .map_err(|err| fabric_error("invalid hello", err))?;

    let mut client = SessionClient::connect(args.target.addr, &request, config)
        .map_err(|err| fabric_error("connect failed", err))?;
    let port = client.hello_response().port;
    let command = Command::from(args.command);

    client
        .push(command, &record)
        .map_err(|err| fabric_error("send failed", err))?;
    client
        .bye()
        .map_err(|err| fabric_error("bye failed", err))?;

    print_sent(port, command.name(), body.len(), format);
    Ok(SUCCESS)
}

fn resolve_body(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}
