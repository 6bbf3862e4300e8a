mod credentials;
mod nevra;
mod profile;

pub use credentials::Credentials;
pub use nevra::Nevra;
pub use profile::{
    BrandingSwap, CertificateSpec, ConversionProfile, PackageManagerKind, BUILTIN_EL7_PROFILE,
};
