use lamb_fabric::{HelloRequest, SessionClient};

use crate::cmd::PullArgs;
use crate::exit::{fabric_error, CliResult, SUCCESS};
use crate::output::{print_item, OutputFormat};

pub fn run(args: PullArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.target.client_config(args.record_size)?;
    let request = HelloRequest::new(args.target.id, args.target.client_type);
    request
        .validate()
        .map_err(|err| fabric_error("invalid hello", err))?;

    let mut client = SessionClient::connect(args.target.addr, &request, config)
        .map_err(|err| fabric_error("connect failed", err))?;

    let mut pulled = 0usize;
    loop {
        if args.count.is_some_and(|count| pulled >= count) {
            break;
        }
        let item = client
            .request()
            .map_err(|err| fabric_error("pull failed", err))?;
        pulled += 1;
        print_item(item.as_ref(), format);
        if item.is_none() {
            break;
        }
    }

    client
        .bye()
        .map_err(|err| fabric_error("bye failed", err))?;
    Ok(SUCCESS)
}
