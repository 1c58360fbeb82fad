//! Xuanwu Deployer
//!
//! Usage:
//! - Normal mode: `xuanwu-deployer`
//! - With custom port: `xuanwu-deployer --port 19880`

use xuanwu_deployer::RuntimeConfig;

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
    println!("Xuanwu Deployer - 应用部署编排引擎");
    println!();
    println!("USAGE:");
    println!("    xuanwu-deployer [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>    Override the listening port (default: PORT or 9880)");
    println!("    -h, --help       Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    DEPLOYER_API_KEY     API key for mutating endpoints");
    println!("    CLUSTER_MODE         simulated (default) | kubectl");
    println!("    REGISTRY_URL         Image registry host");
    println!("    REGISTRY_NAMESPACE   Image registry namespace");
    println!("    CATALOG_FILE         JSON file with projects and applications");
}

#[tokio::main]
async fn main() {
    let config = parse_args();

    if let Err(e) = xuanwu_deployer::init_and_run_with_config(config).await {
        eprintln!("xuanwu-deployer: {}", e);
        std::process::exit(1);
    }
}
