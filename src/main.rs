//! Hook Deploy Agent - webhook 驱动的部署代理
//!
//! Usage:
//! - Normal mode: `hook-deploy-agent`
//! - With custom port: `hook-deploy-agent --port 3000`
//! - With custom config: `hook-deploy-agent --config /etc/deploy/config.json`

use hook_deploy_agent::RuntimeConfig;

/// 解析命令行参数
fn parse_args() -> RuntimeConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = RuntimeConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                config.port_override = args[i + 1].parse().ok();
                i += 2;
            }
            "--config" if i + 1 < args.len() => {
                config.config_override = Some(args[i + 1].clone());
                i += 2;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    config
}

fn print_help() {
    println!("Hook Deploy Agent - webhook 驱动的部署代理");
    println!();
    println!("USAGE:");
    println!("    hook-deploy-agent [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>      Override the listening port");
    println!("    --config <PATH>    Path to the projects config file (default ./config.json)");
    println!("    -h, --help         Print help information");
    println!();
    println!("EXAMPLES:");
    println!("    hook-deploy-agent                                  # Normal mode");
    println!("    hook-deploy-agent --port 8080                      # Custom port");
    println!("    hook-deploy-agent --config /etc/deploy/config.json # Custom config");
}

fn main() {
    let config = parse_args();

    let rt = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    rt.block_on(async {
        hook_deploy_agent::init_and_run(config).await;
    });
}
