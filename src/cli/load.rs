use std::path::PathBuf;

use colored::Colorize;

use crate::cli::store_config;
use crate::error::{LoadError, Result};
use crate::loader;
use crate::settings::{ProductIdentity, ReferencePolicy, Settings};

pub struct LoadArgs<'a> {
    pub files: &'a [PathBuf],
    pub db: Option<&'a str>,
    pub product_identity: Option<ProductIdentity>,
    pub strict: bool,
    pub allow_failures: bool,
}

pub fn run(args: LoadArgs<'_>, settings: &Settings) -> Result<()> {
    let config = store_config(args.db, settings);
    let mut options = settings.load_options();
    if let Some(identity) = args.product_identity {
        options.product_identity = identity;
    }
    if args.strict {
        options.reference_policy = ReferencePolicy::Strict;
    }

    let summary = loader::run(args.files, &config, options);

    for outcome in &summary.outcomes {
        match &outcome.result {
            Ok(report) => println!(
                "{}  {}  ({} rows; new: {} stores, {} clients, {} reps, {} products; {} transactions, {} line items)",
                "OK".green().bold(),
                outcome.path.display(),
                report.rows_read,
                report.stores,
                report.clients,
                report.sales_reps,
                report.products,
                report.transactions,
                report.line_items,
            ),
            Err(e) => println!("{}  {}: {e}", "FAILED".red().bold(), outcome.path.display()),
        }
    }
    println!("{} loaded, {} failed", summary.succeeded(), summary.failed());

    if summary.has_failures() && !(args.allow_failures || settings.allow_failures) {
        return Err(LoadError::Other(format!(
            "{} of {} files failed",
            summary.failed(),
            summary.outcomes.len()
        )));
    }
    Ok(())
}
