/// Logs at info level, dropping ANSI color codes when `colorful` is false
#[macro_export]
macro_rules! cinfo {
    ($colorful:expr, $($arg:tt)+) => {
        log::info!("{}", $crate::utils::strip_ansi_if_needed(&format!($($arg)+), $colorful))
    };
}

/// Removes `ESC [ ... m` sequences unless `colorful` is set
pub fn strip_ansi_if_needed(text: &str, colorful: bool) -> String {
    if colorful {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            // skip parameters up to the final letter
            for code in chars.by_ref() {
                if code.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Member names of a subset joined the way result tables print them
pub fn join_models(models: &[String]) -> String {
    models.join("+")
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Colors a rate in [0, 1]: green above 0.8, yellow above 0.5, red otherwise
pub fn colored_rate(value: f64) -> String {
    let color = if value >= 0.8 {
        "\x1b[1;92m"
    } else if value >= 0.5 {
        "\x1b[1;93m"
    } else {
        "\x1b[1;91m"
    };
    format!("{}{:.3}\x1b[0m", color, value)
}
