use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

impl OutputFormat {
    /// Renders a single value. Table mode has no layout for free-form data, so it uses YAML.
    pub fn document<T: Serialize + ?Sized>(self, value: &T) -> String {
        let rendered = match self {
            OutputFormat::Json => serde_json::to_string_pretty(value).map_err(|e| e.to_string()),
            OutputFormat::Table | OutputFormat::Yaml => {
                serde_yaml::to_string(value).map_err(|e| e.to_string())
            }
        };
        rendered.unwrap_or_else(|e| format!("failed to render output: {e}"))
    }

    pub fn rows<T: Tabled + Serialize>(self, rows: Vec<T>) -> String {
        match self {
            OutputFormat::Table => Table::new(rows).with(Style::rounded()).to_string(),
            _ => self.document(&rows),
        }
    }

    pub fn is_table(self) -> bool {
        self == OutputFormat::Table
    }
}

// Status lines go to stderr so stdout stays parseable in json/yaml mode.
fn notice(marker: ColoredString, message: &str) {
    eprintln!("{marker} {message}");
}

pub fn print_success(message: &str) {
    notice("✓".green(), message);
}

pub fn print_error(message: &str) {
    notice("✗".red().bold(), message);
}

pub fn print_warning(message: &str) {
    notice("!".yellow(), message);
}

pub fn print_info(message: &str) {
    notice("·".blue(), message);
}

pub fn print_progress(message: &str) {
    notice("→".cyan(), message);
}
