use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("lamb {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: lamb");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("LAMB_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "features: fabric={}, async={}, cli=true",
        cfg!(feature = "fabric"),
        cfg!(feature = "async")
    );
    println!(
        "defaults: control_port={}, record_size={}",
        lamb_fabric::DEFAULT_CONTROL_PORT,
        lamb_fabric::DEFAULT_RECORD_SIZE
    );

    Ok(SUCCESS)
}
