//! Bitflyer driver: generic submit -> acknowledge -> poll shape.

use super::generic::{self, VendorBackend};
use super::{CustodianDriver, DriveOutcome};
use crate::error::PaymentError;
use crate::model::AuthenticatedPaymentState;

pub struct BitflyerDriver<B: VendorBackend> {
    backend: B,
}

impl<B: VendorBackend> BitflyerDriver<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

impl<B: VendorBackend> CustodianDriver for BitflyerDriver<B> {
    async fn pay(&self, state: &AuthenticatedPaymentState) -> Result<DriveOutcome, PaymentError> {
        generic::pay(&self.backend, state).await
    }

    async fn fail(&self, state: &AuthenticatedPaymentState, reason: &str) -> DriveOutcome {
        generic::fail(&self.backend, state, reason).await
    }
}
