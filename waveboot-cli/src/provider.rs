//! Resolves everything a programming run needs before the port is opened.
//!
//! Each value comes from the first source that has it: command line (or its
//! environment variable), config file, then discovery. When discovery finds
//! more than one candidate the user is asked, unless running
//! non-interactively, in which case that is a usage error.

use {
    crate::{CliError, config::Config, use_fancy_output},
    anyhow::{Context, Result},
    console::style,
    dialoguer::{Error as DialoguerError, Input, Select, theme::ColorfulTheme},
    log::{debug, info},
    std::{
        io::IsTerminal,
        path::{Path, PathBuf},
    },
    waveboot::{DEFAULT_BAUD, HexFile, PortEnumerator, PortInfo, protocol::DEFAULT_RESET_CODE},
};

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct ProviderOptions {
    /// Explicit port.
    pub port: Option<String>,
    /// Explicit baud rate.
    pub baud: Option<u32>,
    /// Explicit HEX file.
    pub hex: Option<PathBuf>,
    /// Explicit reset code.
    pub reset_code: Option<String>,
    /// Never prompt.
    pub non_interactive: bool,
}

/// Fully resolved inputs of one programming run.
#[derive(Debug)]
pub struct ResolvedSession {
    /// Port of the programmer bridge.
    pub port: String,
    /// Bridge baud rate.
    pub baud: u32,
    /// The loaded image.
    pub image: HexFile,
    /// Reset code of the target node.
    pub reset_code: String,
}

/// Supplies port, image and reset code to the `program` command.
pub struct ConfigurationProvider<'a> {
    options: ProviderOptions,
    config: &'a Config,
}

fn usage_err(message: impl Into<String>) -> anyhow::Error {
    CliError::Usage(message.into()).into()
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Interactive selection needs a terminal; pass the value explicitly or use --non-interactive",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Selection cancelled".to_string()).into()
            } else {
                usage_err(format!("Prompt failed: {io_err}"))
            }
        },
    }
}

/// `*.hex` files directly inside `dir`, sorted by name.
pub fn find_hex_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("hex"))
        })
        .collect();
    files.sort();
    files
}

fn port_label(port: &PortInfo) -> String {
    let vid_pid = match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
        _ => String::new(),
    };
    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();
    format!("{}{vid_pid}{product}", port.name)
}

impl<'a> ConfigurationProvider<'a> {
    /// Create a provider over command-line options and the loaded config.
    pub fn new(options: ProviderOptions, config: &'a Config) -> Self {
        Self { options, config }
    }

    /// Resolve every input and load the image.
    pub fn resolve(&self) -> Result<ResolvedSession> {
        let hex_path = self.resolve_hex_path()?;
        let image = HexFile::from_file(&hex_path)
            .with_context(|| format!("Failed to read {}", hex_path.display()))?;
        if image.is_empty() {
            return Err(usage_err(format!(
                "{} contains no HEX records",
                hex_path.display()
            )));
        }

        let port = self.resolve_port()?;
        let reset_code = self.resolve_reset_code()?;

        Ok(ResolvedSession {
            port,
            baud: self.resolve_baud(),
            image,
            reset_code,
        })
    }

    /// Bridge baud rate.
    pub fn resolve_baud(&self) -> u32 {
        self.options
            .baud
            .or(self.config.connection.baud)
            .unwrap_or(DEFAULT_BAUD)
    }

    /// Port of the programmer bridge.
    pub fn resolve_port(&self) -> Result<String> {
        if let Some(port) = &self.options.port {
            return Ok(port.clone());
        }
        if let Some(port) = &self.config.connection.port {
            debug!("Using port from config: {port}");
            return Ok(port.clone());
        }

        let ports = enumerate_ports()?;
        self.select_port(ports)
    }

    fn select_port(&self, ports: Vec<PortInfo>) -> Result<String> {
        match ports.len() {
            0 => Err(usage_err(
                "No serial ports found; connect the programmer bridge or pass --port",
            )),
            1 => {
                let name = ports
                    .into_iter()
                    .map(|p| p.name)
                    .next()
                    .unwrap_or_default();
                info!("Auto-selected port: {name}");
                Ok(name)
            },
            _ if self.options.non_interactive => Err(usage_err(
                "Multiple serial ports found; pass --port in non-interactive mode",
            )),
            _ => {
                ensure_interactive_terminal()?;
                let labels: Vec<String> = ports.iter().map(port_label).collect();
                let index = prompt_select("Select the programmer bridge port", &labels)?;
                Ok(ports[index].name.clone())
            },
        }
    }

    /// HEX file to program.
    pub fn resolve_hex_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.options.hex {
            return Ok(path.clone());
        }

        let base = std::env::current_dir().context("failed to get current directory")?;
        self.select_hex_file(&base, find_hex_files(&base))
    }

    fn select_hex_file(&self, base: &Path, mut files: Vec<PathBuf>) -> Result<PathBuf> {
        match files.len() {
            0 => Err(usage_err(format!(
                "No .hex files found in {}; pass the file explicitly",
                base.display()
            ))),
            1 => {
                let path = files.remove(0);
                info!("Using {}", path.display());
                Ok(path)
            },
            _ if self.options.non_interactive => {
                for file in &files {
                    eprintln!("  {}", file.strip_prefix(base).unwrap_or(file).display());
                }
                Err(usage_err(
                    "Multiple .hex files found; pass the file explicitly in non-interactive mode",
                ))
            },
            _ => {
                ensure_interactive_terminal()?;
                let labels: Vec<String> = files
                    .iter()
                    .map(|f| f.strip_prefix(base).unwrap_or(f).display().to_string())
                    .collect();
                let index = prompt_select("Select a HEX file", &labels)?;
                Ok(files.swap_remove(index))
            },
        }
    }

    /// Reset code of the target node; prompts with `RESET` as the default.
    pub fn resolve_reset_code(&self) -> Result<String> {
        if let Some(code) = self
            .options
            .reset_code
            .as_ref()
            .or(self.config.program.reset_code.as_ref())
        {
            return non_empty_code(code);
        }

        if self.options.non_interactive || !std::io::stdin().is_terminal() {
            return Ok(DEFAULT_RESET_CODE.to_string());
        }

        let code: String = Input::with_theme(&ColorfulTheme::default())
            .with_prompt("Reset code")
            .default(DEFAULT_RESET_CODE.to_string())
            .interact_text()
            .map_err(map_prompt_error)?;
        non_empty_code(&code)
    }
}

fn non_empty_code(code: &str) -> Result<String> {
    let code = code.trim();
    if code.is_empty() {
        Ok(DEFAULT_RESET_CODE.to_string())
    } else {
        Ok(code.to_string())
    }
}

fn enumerate_ports() -> Result<Vec<PortInfo>> {
    waveboot::NativePortEnumerator::list_ports().context("Failed to enumerate serial ports")
}

fn prompt_select(prompt: &str, labels: &[String]) -> Result<usize> {
    let term_width = usize::from(console::Term::stderr().size().1);
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = labels
        .iter()
        .map(|l| console::truncate_str(l, max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = if use_fancy_output() {
        Select::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .items(&labels)
            .default(0)
            .interact_opt()
    } else {
        Select::new()
            .with_prompt(prompt)
            .items(&labels)
            .default(0)
            .interact_opt()
    }
    .map_err(map_prompt_error)?;

    selection.ok_or_else(|| CliError::Cancelled("Selection cancelled".to_string()).into())
}
