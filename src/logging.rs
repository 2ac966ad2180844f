use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// 初始化日志系统
///
/// 指定 `log_file` 时额外写入该文件（非阻塞），返回的 `WorkerGuard` 需要保持到进程退出。
pub fn init_logging(
    log_level: &str,
    log_format: Option<&str>,
    log_file: Option<&str>,
    quiet: bool,
) -> Result<Option<WorkerGuard>> {
    // 如果静默模式，只输出错误
    let level = if quiet { "error" } else { log_level };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let mut layers: Vec<BoxedLayer> = vec![format_layer(log_format, std::io::stdout, true)];

    let guard = match log_file {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            layers.push(format_layer(log_format, writer, false));
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .context("日志系统已初始化")?;

    Ok(guard)
}

fn format_layer<W>(log_format: Option<&str>, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    match log_format {
        // JSON 格式（适合生产环境）
        Some("json") => fmt::layer().json().with_writer(writer).boxed(),
        // Pretty 格式（适合开发环境）
        Some("pretty") | Some("dev") => fmt::layer().pretty().with_ansi(ansi).with_writer(writer).boxed(),
        // Compact 格式（默认）
        _ => fmt::layer().compact().with_ansi(ansi).with_writer(writer).boxed(),
    }
}

fn file_writer(path: &str) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let path = Path::new(path);
    let file_name = path
        .file_name()
        .with_context(|| format!("日志文件路径无效: {}", path.display()))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).with_context(|| format!("无法创建日志目录: {}", dir.display()))?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}
