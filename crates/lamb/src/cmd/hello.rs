use lamb_fabric::{hello, HelloRequest};

use crate::cmd::{parse_duration, HelloArgs};
use crate::exit::{fabric_error, CliResult, SUCCESS};
use crate::output::{print_hello, OutputFormat};

pub fn run(args: HelloArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.target.timeout)?;
    let request = HelloRequest::new(args.target.id, args.target.client_type);
    request
        .validate()
        .map_err(|err| fabric_error("invalid hello", err))?;

    let response = hello(args.target.addr, &request, timeout)
        .map_err(|err| fabric_error("hello failed", err))?;
    print_hello(&response, format);

    Ok(SUCCESS)
}
