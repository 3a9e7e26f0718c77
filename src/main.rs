use clap::ArgMatches;
use std::error::Error;

use v_realtime::command_registry::{build_app, handle_version_command, ServerArgs};
use v_realtime::comm::config_validator::EnvironmentConfigLoader;
use v_realtime::comm::enhanced_config::EnhancedConfigManager;
use v_realtime::AppBootstrap;

#[actix_web::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let matches: ArgMatches = build_app().get_matches();

    match matches.subcommand() {
        Some(("server", sub_matches)) => {
            handle_server_command(sub_matches).await?;
        }
        Some(("version", _)) => {
            handle_version_command();
        }
        _ => {
            // subcommand_required(true) 保证不会到达 / unreachable with subcommand_required
            eprintln!("未知命令，请使用 --help 查看可用命令");
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn handle_server_command(matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let args = ServerArgs::from_matches(matches);

    // 分层加载配置并校验 / Layered config load plus validation
    let mut config = EnhancedConfigManager::load(EnvironmentConfigLoader::new(), args.config.as_deref(), Vec::new())?;
    config.override_listeners(args.host, args.http_port, args.ws_port)?;

    AppBootstrap::new(config).run().await?;
    Ok(())
}
