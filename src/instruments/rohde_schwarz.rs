use async_trait::async_trait;
use log::info;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

use super::{scpi::ScpiPort, Instrument};

/// R&S NRP family power sensor (NRP-6A, NRP40SN, NRP2, NRQ6).
pub struct RsNrp<T> {
    port: ScpiPort<T>,
}

impl<T> RsNrp<T> {
    pub const MODEL: &'static str = "R&S NRP power sensor";

    pub const RESOURCE_PATTERNS: &'static [&'static str] = &[
        r"^USB\d+::2733::376::\d+::0::INSTR$",
        r"^USB\d+::2733::352::\d+::0::INSTR$",
        r"^USB\d+::2733::27::\d+::0::INSTR$",
        r"^USB\d+::0x0AAD::0x001B::\d+::INSTR$",
        r"^USB\d+::2733::347::\d+::0::INSTR$",
    ];

    pub fn new(port: ScpiPort<T>) -> Self {
        Self { port }
    }
}

#[async_trait]
impl<T> Instrument for RsNrp<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    async fn init_power_meter(&mut self) -> Result<()> {
        for command in [
            "SENS:AVER:COUN 20",
            "SENS:AVER:COUN:AUTO ON",
            "UNIT:POW DBM",
            "SENS:FUNC \"POW:AVG\"",
        ] {
            self.port.write(command).await?;
        }
        info!("Power sensor initialised");
        Ok(())
    }

    async fn set_frequency(&mut self, hz: f64) -> Result<()> {
        self.port.write(&format!("SENS:FREQ {hz}")).await
    }

    async fn get_power_dbm(&mut self) -> Result<f64> {
        self.port.write("INIT:IMM").await?;
        self.port.query_f64("FETCH?").await
    }
}

/// R&S SMA100A analog signal generator.
pub struct RsSma100a<T> {
    port: ScpiPort<T>,
}

impl<T> RsSma100a<T> {
    pub const MODEL: &'static str = "R&S SMA100A signal generator";

    pub const RESOURCE_PATTERNS: &'static [&'static str] = &[
        r"^USB\d+::2733::72::\d+::0::INSTR$",
        r"^USB\d+::0x0AAD::0x0048::\d+::INSTR$",
    ];

    pub fn new(port: ScpiPort<T>) -> Self {
        Self { port }
    }
}

#[async_trait]
impl<T> Instrument for RsSma100a<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn model(&self) -> &'static str {
        Self::MODEL
    }

    async fn init_signal_generator(&mut self) -> Result<()> {
        self.port.write("*RST").await?;
        info!("Signal generator reset");
        Ok(())
    }

    async fn set_frequency(&mut self, hz: f64) -> Result<()> {
        self.port.write(&format!("SOUR:FREQ {hz}")).await
    }

    async fn get_power_dbm(&mut self) -> Result<f64> {
        self.port.query_f64("SOUR:POW:LEV?").await
    }

    async fn set_power_dbm(&mut self, dbm: f64) -> Result<f64> {
        self.port.write(&format!("SOUR:POW:LEV {dbm}")).await?;
        self.port.query_f64("SOUR:POW:LEV?").await
    }

    async fn enable(&mut self, on: bool) -> Result<()> {
        let state = if on { "ON" } else { "OFF" };
        self.port.write(&format!("OUTP:STAT {state}")).await
    }
}
