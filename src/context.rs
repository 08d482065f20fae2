use crate::health::certificate::CertificateProbe;
use crate::notify::Mailer;
use crate::remote::RemoteStore;
use crate::runtime::Runtime;
use crate::util::retry::Clock;

/// External collaborators of one run. Production wiring lives in `cli`; tests
/// substitute fakes.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub runtime: &'a dyn Runtime,
    pub probe: &'a dyn CertificateProbe,
    pub remote: &'a dyn RemoteStore,
    pub mailer: &'a dyn Mailer,
    pub clock: &'a dyn Clock,
}
