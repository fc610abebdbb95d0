//! SCPI drivers for the bench instruments used during power calibration.
//!
//! Each model implements only the operations it has; everything else falls
//! through to the trait defaults, which fail with `Error::NotSupported`
//! before touching the stream.

mod rohde_schwarz;
mod scpi;

pub use rohde_schwarz::{RsNrp, RsSma100a};
pub use scpi::ScpiPort;

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::RegexSet;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};

fn unsupported(model: &'static str, operation: &'static str) -> Error {
    Error::NotSupported { model, operation }
}

#[async_trait]
pub trait Instrument: Send {
    fn model(&self) -> &'static str;

    async fn init_power_meter(&mut self) -> Result<()> {
        Err(unsupported(self.model(), "init_power_meter"))
    }

    async fn init_signal_generator(&mut self) -> Result<()> {
        Err(unsupported(self.model(), "init_signal_generator"))
    }

    async fn set_frequency(&mut self, _hz: f64) -> Result<()> {
        Err(unsupported(self.model(), "set_frequency"))
    }

    async fn get_power_dbm(&mut self) -> Result<f64> {
        Err(unsupported(self.model(), "get_power_dbm"))
    }

    /// Set the output level and return the level the instrument reports back.
    async fn set_power_dbm(&mut self, _dbm: f64) -> Result<f64> {
        Err(unsupported(self.model(), "set_power_dbm"))
    }

    async fn enable(&mut self, _on: bool) -> Result<()> {
        Err(unsupported(self.model(), "enable"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentModel {
    RsNrp,
    RsSma100a,
}

static NRP_IDS: LazyLock<Result<RegexSet, regex::Error>> =
    LazyLock::new(|| RegexSet::new(RsNrp::<()>::RESOURCE_PATTERNS));
static SMA100A_IDS: LazyLock<Result<RegexSet, regex::Error>> =
    LazyLock::new(|| RegexSet::new(RsSma100a::<()>::RESOURCE_PATTERNS));

fn matches_any(set: &Result<RegexSet, regex::Error>, resource_id: &str) -> Result<bool> {
    set.as_ref()
        .map(|set| set.is_match(resource_id))
        .map_err(|err| Error::Instrument(format!("invalid resource pattern: {err}")))
}

impl InstrumentModel {
    /// Identify the model from a VISA resource id such as
    /// `USB0::2733::376::101234::0::INSTR`.
    pub fn detect(resource_id: &str) -> Result<Option<Self>> {
        if matches_any(&NRP_IDS, resource_id)? {
            Ok(Some(Self::RsNrp))
        } else if matches_any(&SMA100A_IDS, resource_id)? {
            Ok(Some(Self::RsSma100a))
        } else {
            Ok(None)
        }
    }
}

/// Open a driver for the instrument behind `resource_id` on an established stream.
pub fn connect<T>(resource_id: &str, io: T, timeout: Duration) -> Result<Box<dyn Instrument>>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let port = ScpiPort::new(io, timeout);
    match InstrumentModel::detect(resource_id)? {
        Some(InstrumentModel::RsNrp) => Ok(Box::new(RsNrp::new(port))),
        Some(InstrumentModel::RsSma100a) => Ok(Box::new(RsSma100a::new(port))),
        None => Err(Error::Instrument(format!(
            "no driver for resource '{resource_id}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;

    const NRP_6A: &str = "USB0::2733::376::100543::0::INSTR";
    const SMA: &str = "USB0::0x0AAD::0x0048::102345::INSTR";

    fn open(resource_id: &str) -> (Box<dyn Instrument>, DuplexStream) {
        let (client, device) = duplex(1024);
        let instrument = connect(resource_id, client, Duration::from_secs(1)).unwrap();
        (instrument, device)
    }

    async fn sent(instrument: Box<dyn Instrument>, mut device: DuplexStream) -> String {
        drop(instrument);
        let mut written = String::new();
        device.read_to_string(&mut written).await.unwrap();
        written
    }

    #[test]
    fn resource_patterns_compile() {
        for pattern in RsNrp::<()>::RESOURCE_PATTERNS
            .iter()
            .chain(RsSma100a::<()>::RESOURCE_PATTERNS)
        {
            assert!(regex::Regex::new(pattern).is_ok(), "{pattern}");
        }
        assert!(NRP_IDS.is_ok());
        assert!(SMA100A_IDS.is_ok());
    }

    #[test]
    fn detects_models_from_resource_ids() {
        let detect = |id: &str| InstrumentModel::detect(id).unwrap();

        assert_eq!(detect(NRP_6A), Some(InstrumentModel::RsNrp));
        assert_eq!(
            detect("USB1::2733::347::9::0::INSTR"),
            Some(InstrumentModel::RsNrp)
        );
        assert_eq!(
            detect("USB0::2733::72::4411::0::INSTR"),
            Some(InstrumentModel::RsSma100a)
        );
        assert_eq!(detect(SMA), Some(InstrumentModel::RsSma100a));
        assert_eq!(detect("TCPIP0::10.0.0.2::INSTR"), None);
        assert_eq!(detect("xUSB0::2733::376::100543::0::INSTR"), None);
        assert!(connect("GPIB0::5::INSTR", duplex(8).0, Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn power_meter_sequence() {
        let (mut nrp, mut device) = open(NRP_6A);
        device.write_all(b"-12.25\n").await.unwrap();

        nrp.init_power_meter().await.unwrap();
        nrp.set_frequency(3.5e9).await.unwrap();
        assert_eq!(nrp.get_power_dbm().await.unwrap(), -12.25);

        assert_eq!(
            sent(nrp, device).await,
            "SENS:AVER:COUN 20\nSENS:AVER:COUN:AUTO ON\nUNIT:POW DBM\n\
             SENS:FUNC \"POW:AVG\"\nSENS:FREQ 3500000000\nINIT:IMM\nFETCH?\n"
        );
    }

    #[tokio::test]
    async fn power_meter_cannot_generate() {
        let (mut nrp, device) = open(NRP_6A);

        let err = nrp.init_signal_generator().await.unwrap_err();
        assert!(matches!(
            err,
            Error::NotSupported {
                operation: "init_signal_generator",
                ..
            }
        ));
        assert!(nrp.enable(true).await.is_err());
        assert_eq!(sent(nrp, device).await, "");
    }

    #[tokio::test]
    async fn signal_generator_sequence() {
        let (mut sma, mut device) = open(SMA);
        device.write_all(b"-10\n").await.unwrap();

        sma.init_signal_generator().await.unwrap();
        assert_eq!(sma.set_power_dbm(-10.0).await.unwrap(), -10.0);
        sma.enable(true).await.unwrap();
        assert!(matches!(
            sma.init_power_meter().await,
            Err(Error::NotSupported { .. })
        ));

        assert_eq!(
            sent(sma, device).await,
            "*RST\nSOUR:POW:LEV -10\nSOUR:POW:LEV?\nOUTP:STAT ON\n"
        );
    }
}
