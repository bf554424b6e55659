//! Transport abstraction over the HID feature report channel
//!
//! A [`FeatureTransport`] is a discovered bootloader device. Each
//! high-level operation opens it once, obtaining a [`FeatureChannel`], and
//! drops the channel when done; dropping releases the device on every exit
//! path, including errors.

use crate::error::Result;

/// An open feature report channel
pub trait FeatureChannel {
    /// Send one feature report
    ///
    /// `report` is exactly the layout's report size, byte 0 being the
    /// report ID.
    fn set_feature_report(&mut self, report: &[u8]) -> Result<()>;

    /// Receive one feature report into `report`
    ///
    /// On success the whole buffer has been filled, byte 0 being the
    /// report ID.
    fn get_feature_report(&mut self, report: &mut [u8]) -> Result<()>;
}

/// A bootloader device that can be opened for an operation
pub trait FeatureTransport {
    /// Channel type returned by [`open`](Self::open); closed on drop
    type Channel: FeatureChannel;

    /// Acquire the device for one operation
    fn open(&mut self) -> Result<Self::Channel>;

    /// Feature report size the device declares, including the report ID byte
    fn report_size(&self) -> usize;
}

impl<T: FeatureChannel + ?Sized> FeatureChannel for Box<T> {
    fn set_feature_report(&mut self, report: &[u8]) -> Result<()> {
        (**self).set_feature_report(report)
    }

    fn get_feature_report(&mut self, report: &mut [u8]) -> Result<()> {
        (**self).get_feature_report(report)
    }
}
