use std::io::Write;

/// 初始化全局 logger
///
/// 默认过滤级别为 Info，可以通过 `RUST_LOG` 覆盖
pub fn init_log() {
    env_logger::Builder::new()
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let warn_style = buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
            let error_style = buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => warn_style,
                log::Level::Error => error_style,
                _ => buf.default_level_style(record.level()),
            };
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

            let line = record.line().unwrap_or(!0);
            let file = short_file_name(record.file().unwrap_or(""));
            let time = chrono::Local::now().format("%H:%M:%S");
            let level = record.level();

            writeln!(
                buf,
                "{level_style}[{time}] {level}{level_style:#} {grey_style}[{file}:{line}]{grey_style:#} {}",
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .parse_default_env()
        .try_init()
        .ok();
}

/// windows 和 unix 的路径分隔符都需要处理
fn short_file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_file_name() {
        assert_eq!(short_file_name("engine/crates/ember-gfx/src/gfx.rs"), "gfx.rs");
        assert_eq!(short_file_name("engine\\crates\\ember-gfx\\src\\gfx.rs"), "gfx.rs");
        assert_eq!(short_file_name("main.rs"), "main.rs");
        assert_eq!(short_file_name(""), "");
    }

    #[test]
    fn test_init_log_twice() {
        // 第二次初始化不能 panic
        init_log();
        init_log();
        log::info!("logger ready");
    }
}
