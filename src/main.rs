use flexi_logger::{DeferredNow, Duplicate, FileSpec, Logger, LoggerHandle};
use fraudvote::param::{self, Param};
use fraudvote::{cinfo, run};
use log::{error, Record};
use std::process;

fn log_format(w: &mut dyn std::io::Write, _now: &mut DeferredNow, record: &Record) -> std::io::Result<()> {
    write!(
        w,
        "{} | {} | {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        record.level(),
        record.args()
    )
}

fn init_logger(param: &Param) -> Result<LoggerHandle, flexi_logger::FlexiLoggerError> {
    let logger = Logger::try_with_str(&param.general.log_level)?.format(log_format);

    if param.general.log_base.is_empty() {
        logger.log_to_stderr().start()
    } else {
        logger
            .log_to_file(
                FileSpec::default()
                    .basename(&param.general.log_base)
                    .suffix(&param.general.log_suffix)
                    .use_timestamp(true),
            )
            .duplicate_to_stderr(Duplicate::All)
            .start()
    }
}

fn main() {
    let param_file = std::env::args().nth(1).unwrap_or_else(|| "param.yaml".to_string());

    let param = match param::get(&param_file) {
        Ok(param) => param,
        Err(e) => {
            eprintln!("Cannot load parameters from {}: {}", param_file, e);
            process::exit(1);
        }
    };

    let _logger = match init_logger(&param) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Cannot start logger: {}", e);
            process::exit(1);
        }
    };

    match run(&param) {
        Ok(evaluation) => {
            cinfo!(param.general.display_colorful, "{}", evaluation.display_results());
        }
        Err(e) => {
            error!("Evaluation failed: {}", e);
            process::exit(if e.is_structural() { 2 } else { 1 });
        }
    }
}
