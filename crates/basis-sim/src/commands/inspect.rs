use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use basis_pipe::load_table;
use clap::{Args, ValueEnum};

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Path to a `spectra.json` table.
    #[arg(long)]
    pub table: PathBuf,
    /// Output format.
    #[arg(long, value_enum, default_value_t = Format::Text)]
    pub format: Format,
    /// Only print pairs involving this field label.
    #[arg(long)]
    pub field: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Text,
    Csv,
}

fn cell(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |value| format!("{value:.6e}"))
}

pub fn run(args: &InspectArgs) -> Result<(), Box<dyn Error>> {
    let mut table = load_table(&args.table)?;
    if let Some(field) = &args.field {
        table.pairs.retain(|pair| &pair.a == field || &pair.b == field);
    }
    let stdout = io::stdout();
    if args.format == Format::Csv {
        table.write_csv(stdout.lock())?;
        return Ok(());
    }

    let mut out = stdout.lock();
    writeln!(
        out,
        "nmesh {} | box {} | kernel {:?} | compensated {} | hash {}",
        table.nmesh, table.box_length, table.kernel, table.compensated, table.table_hash
    )?;
    for field in &table.fields {
        writeln!(
            out,
            "field {:<8} particles {:>10} <w^2> {:.6e}",
            field.label, field.particles, field.mean_weight_sq
        )?;
    }
    for pair in &table.pairs {
        writeln!(out, "\n{} x {} (shot noise {:.6e})", pair.a, pair.b, pair.shot_noise)?;
        writeln!(out, "{:>14} {:>14} {:>14} {:>8}", "k_center", "k_mean", "power", "modes")?;
        for row in &pair.rows {
            writeln!(
                out,
                "{:>14} {:>14} {:>14} {:>8}",
                format!("{:.6e}", row.k_center),
                cell(row.k_mean),
                cell(row.power),
                row.modes
            )?;
        }
    }
    Ok(())
}
