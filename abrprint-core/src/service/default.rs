use crate::transport::Transport;

use super::{
    DefaultFingerprinter, DefaultVariantExtractor, Fingerprinter, Service, VariantExtractor,
    DEFAULT_SERVICE_ID,
};

/// The provider-independent service: generic variant extraction and
/// fingerprinting, carrying no site origin.
pub struct DefaultService {
    variant_extractor: DefaultVariantExtractor,
    fingerprinter: DefaultFingerprinter,
}

impl DefaultService {
    pub fn new(transport: Transport) -> Self {
        Self {
            variant_extractor: DefaultVariantExtractor::new(transport.clone(), None),
            fingerprinter: DefaultFingerprinter::new(transport, None),
        }
    }
}

impl Service for DefaultService {
    fn id(&self) -> &str {
        DEFAULT_SERVICE_ID
    }

    fn variant_extractor(&self) -> Option<&dyn VariantExtractor> {
        Some(&self.variant_extractor)
    }

    fn fingerprinter(&self) -> Option<&dyn Fingerprinter> {
        Some(&self.fingerprinter)
    }
}
