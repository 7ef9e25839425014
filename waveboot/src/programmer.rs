//! High-level programmer: handshake followed by a line transfer.

use {
    crate::{
        error::{Error, Result},
        image::HexFile,
        port::Port,
        protocol::token::TokenReader,
        session::{
            HandshakeController, ProgressSink, TransferConfig, TransferEngine, TransferReport,
            TransferSession,
        },
    },
    log::info,
};

/// Drives one bootloader over a port.
///
/// A successful [`connect`](Self::connect) arms exactly one
/// [`program`](Self::program) call; the bootloader leaves programming mode
/// once a session ends, so the next image needs a new handshake.
pub struct Programmer<P: Port> {
    port: P,
    reader: TokenReader,
    handshake: HandshakeController,
    config: TransferConfig,
    armed_reset_code: Option<String>,
}

impl<P: Port> Programmer<P> {
    /// Wrap an open port with default settings.
    pub fn new(port: P) -> Self {
        Self {
            port,
            reader: TokenReader::new(),
            handshake: HandshakeController::new(),
            config: TransferConfig::default(),
            armed_reset_code: None,
        }
    }

    /// Use custom transfer settings.
    #[must_use]
    pub fn with_config(mut self, config: TransferConfig) -> Self {
        self.handshake = self.handshake.with_poll_interval(config.poll_interval);
        self.config = config;
        self
    }

    /// Use a custom handshake controller.
    #[must_use]
    pub fn with_handshake(mut self, handshake: HandshakeController) -> Self {
        self.handshake = handshake;
        self
    }

    /// Transfer settings in use.
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// The underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// The underlying port, mutably.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Give the port back.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Whether a handshake succeeded and no session has run since.
    pub fn is_ready(&self) -> bool {
        self.armed_reset_code.is_some()
    }

    /// Reset the node and wait until its bootloader reports ready.
    pub fn connect(&mut self, reset_code: &str) -> Result<()> {
        self.armed_reset_code = None;
        self.handshake.perform(
            &mut self.port,
            &mut self.reader,
            reset_code,
            self.config.handshake_timeout,
        )?;
        self.armed_reset_code = Some(reset_code.to_string());
        Ok(())
    }

    /// Stream every line of `image` to the ready bootloader.
    pub fn program<S: ProgressSink + ?Sized>(
        &mut self,
        image: &HexFile,
        progress: &mut S,
    ) -> Result<TransferReport> {
        let reset_code = self.armed_reset_code.take().ok_or(Error::NotReady)?;
        let session = TransferSession::from_hex_file(image, reset_code);

        let report = TransferEngine::new(&mut self.port, &mut self.reader, &self.config)
            .run(session, progress)?;

        info!(
            "Programmed {}/{} lines with {} writes in {:.1}s",
            report.lines_acked,
            report.lines_total,
            report.attempts_used,
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    /// [`connect`](Self::connect) then [`program`](Self::program).
    pub fn flash<S: ProgressSink + ?Sized>(
        &mut self,
        reset_code: &str,
        image: &HexFile,
        progress: &mut S,
    ) -> Result<TransferReport> {
        self.connect(reset_code)?;
        self.program(image, progress)
    }

    /// Close the port.
    pub fn close(&mut self) -> Result<()> {
        self.armed_reset_code = None;
        self.port.close()
    }
}

#[cfg(feature = "native")]
mod native {
    use {
        super::Programmer,
        crate::{
            error::Result,
            port::{NativePort, SerialConfig},
        },
        log::{debug, warn},
        std::{thread, time::Duration},
    };

    impl Programmer<NativePort> {
        /// Open `port_name`, retrying briefly while the device settles.
        pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
            const MAX_OPEN_PORT_ATTEMPTS: usize = 3;
            const OPEN_RETRY_DELAY: Duration = Duration::from_millis(500);

            let config = SerialConfig::new(port_name, baud_rate);
            let mut attempt = 1;
            loop {
                match NativePort::open(&config) {
                    Ok(port) => {
                        if attempt > 1 {
                            debug!("Port opened on attempt {attempt}");
                        }
                        return Ok(Self::new(port));
                    },
                    Err(e) if attempt < MAX_OPEN_PORT_ATTEMPTS => {
                        warn!(
                            "Failed to open port {port_name} (attempt {attempt}/{MAX_OPEN_PORT_ATTEMPTS}): {e}"
                        );
                        thread::sleep(OPEN_RETRY_DELAY);
                        attempt += 1;
                    },
                    Err(e) => return Err(e),
                }
            }
        }
    }
}
