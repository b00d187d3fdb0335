use pic_loader::services::loader::{
    ImageDecoder, InFlightRegistry, LifecycleCallbacks, LoadOutcome, PicLoader, RenderTarget,
    SettingsManager,
};
use std::sync::Arc;

const USAGE: &str = "用法: pic_loader <url>... | clear <url> | clear-all | stats";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load environment variables
    dotenv::dotenv().ok();

    // Load settings (PIC_LOADER_CONFIG_PATH or ./pic_loader.json)
    let settings_manager = SettingsManager::load(None).await?;
    let settings = settings_manager.get_settings().await;
    tracing::info!("设置已加载: {:?}", settings_manager.settings_path());

    let loader = PicLoader::from_settings(&settings, InFlightRegistry::new())?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => {
            eprintln!("{}", USAGE);
        }
        Some("clear") => {
            let Some(url) = args.get(1) else {
                anyhow::bail!(USAGE);
            };
            loader.clear_cache(url).await;
        }
        Some("clear-all") => {
            loader.clear_all_cached_files().await;
        }
        Some("stats") => {
            let stats = loader.cache_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Some(_) => {
            let config = settings_manager.request_config().await;
            let target: Arc<dyn RenderTarget> = Arc::new(ImageDecoder);

            let handles: Vec<_> = args
                .iter()
                .map(|url| {
                    let label = url.clone();
                    let callbacks = LifecycleCallbacks::new()
                        .on_download_progress_changed({
                            let label = label.clone();
                            move |p| tracing::debug!("下载进度 {}%: {}", p, label)
                        })
                        .on_error({
                            let label = label.clone();
                            move |msg| tracing::warn!("加载失败: {} - {}", label, msg)
                        });
                    let handle =
                        loader.request(url, config.clone(), Some(Arc::clone(&target)), callbacks);
                    (label, handle)
                })
                .collect();

            for (url, handle) in handles {
                match handle.outcome().await? {
                    LoadOutcome::Loaded { key, source, handle } => {
                        println!(
                            "{} -> {} ({:?}, {} 字节, {:?} {:?})",
                            url, key, source, handle.len, handle.format, handle.dimensions
                        );
                    }
                    LoadOutcome::Placeholder { error, .. } => {
                        println!("{} -> 错误占位图 ({})", url, error);
                    }
                    LoadOutcome::Failed { error, .. } => {
                        println!("{} -> 失败 ({})", url, error);
                    }
                }
            }
        }
    }

    Ok(())
}
