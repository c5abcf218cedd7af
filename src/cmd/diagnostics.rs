//! Diagnostics command: reports container runtime connectivity and the
//! resolved engine catalog, for debugging a daemon deployment.

use anyhow::Result;
use bollard::Docker;

use inferno_daemon::engine::EngineCatalog;

/// Run diagnostics and display container-runtime and catalog information.
pub async fn run(catalog_path: Option<&str>) -> Result<()> {
    println!("Inferno Daemon Diagnostics");
    println!("==========================\n");

    println!("Container Runtime:");
    println!("-------------------");

    match Docker::connect_with_local_defaults() {
        Ok(docker) => {
            match docker.version().await {
                Ok(version) => {
                    println!("  Version: {}", version.version.unwrap_or_default());
                    println!("  API Version: {}", version.api_version.unwrap_or_default());
                    println!(
                        "  OS/Arch: {}/{}",
                        version.os.unwrap_or_default(),
                        version.arch.unwrap_or_default()
                    );
                }
                Err(e) => println!("  Error getting version: {}", e),
            }

            match docker.info().await {
                Ok(info) => {
                    println!("  Containers: {}", info.containers.unwrap_or(0));
                    println!("    Running: {}", info.containers_running.unwrap_or(0));
                    println!("    Stopped: {}", info.containers_stopped.unwrap_or(0));
                    println!("  Images: {}", info.images.unwrap_or(0));
                    println!("  Storage Driver: {}", info.driver.unwrap_or_default());
                }
                Err(e) => println!("  Error getting info: {}", e),
            }
        }
        Err(e) => {
            println!("  Error connecting to container runtime: {}", e);
            println!("  Make sure Docker is running and accessible.");
        }
    }

    println!("\nEngine Catalog:");
    println!("---------------");
    let catalog = match catalog_path {
        Some(path) if !path.is_empty() => EngineCatalog::load(std::path::Path::new(path))?,
        _ => EngineCatalog::default(),
    };
    for engine_type in ["vllm", "whisper", "tts"] {
        let asset = catalog.asset(engine_type).cloned().unwrap_or_default();
        let candidates = asset.image_candidates(engine_type);
        println!("  {}: {}", engine_type, candidates.join(", "));
    }

    println!("\nDiagnostics complete.");
    Ok(())
}
