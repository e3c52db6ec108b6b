use winshare_session::GREETING;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("winshare {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: winshare");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "protocol: {}",
        String::from_utf8_lossy(GREETING).trim_end()
    );
    println!(
        "max_payload: {}",
        winshare_frame::MAX_PAYLOAD
    );
    println!(
        "target: {}",
        option_env!("WINSHARE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("features: async={}, cli=true", cfg!(feature = "async"));

    Ok(SUCCESS)
}
