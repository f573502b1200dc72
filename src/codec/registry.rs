//! Method ID to decoder constructor mapping.

use crate::format::streams::Coder;
use crate::{Error, Result};

use super::{Decoder, copy, method};

/// Builds a decoder for one coder from its resolved input streams.
///
/// `unpack_size` is the declared size of the coder's output stream.
pub type DecoderConstructor =
    fn(inputs: Vec<Box<dyn Decoder>>, coder: &Coder, unpack_size: u64) -> Result<Box<dyn Decoder>>;

/// A registered method.
#[derive(Debug, Clone, Copy)]
pub struct MethodInfo {
    /// Method ID bytes.
    pub id: &'static [u8],
    /// Display name used in method strings.
    pub name: &'static str,
    /// Decoder constructor, `None` for methods that are recognized only.
    pub constructor: Option<DecoderConstructor>,
}

impl MethodInfo {
    /// Returns `true` if coders using this method can be decoded.
    pub fn is_decodable(&self) -> bool {
        self.constructor.is_some()
    }
}

/// Registry of known coding methods.
///
/// [`CodecRegistry::default`] knows Copy, LZMA, LZMA2, BCJ, BCJ2, PPMD,
/// Deflate, Deflate64, BZip2 and 7zAES. PPMD and 7zAES never get a
/// constructor; the others get one when their cargo feature is enabled.
///
/// ```rust
/// use sevenz_extract::codec::{CodecRegistry, method};
///
/// let registry = CodecRegistry::default();
/// assert_eq!(registry.name_of(method::LZMA), Some("LZMA"));
/// assert!(!registry.lookup(method::PPMD).unwrap().is_decodable());
/// assert!(registry.lookup(&[0x7F]).is_none());
/// ```
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    methods: Vec<MethodInfo>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(method::COPY, "Copy", Some(copy::build_decoder));
        registry.register(method::LZMA, "LZMA", None);
        registry.register(method::LZMA2, "LZMA2", None);
        registry.register(method::BCJ_X86, "BCJ", None);
        registry.register(method::BCJ2, "BCJ2", Some(super::bcj2::build_decoder));
        registry.register(method::PPMD, "PPMD", None);
        registry.register(method::DEFLATE, "Deflate", None);
        registry.register(method::DEFLATE64, "Deflate64", None);
        registry.register(method::BZIP2, "BZip2", None);
        registry.register(method::AES, "7zAES", None);

        #[cfg(feature = "lzma")]
        {
            registry.attach(method::LZMA, super::lzma::build_lzma_decoder);
            registry.attach(method::LZMA2, super::lzma::build_lzma2_decoder);
            registry.attach(method::BCJ_X86, super::filters::build_bcj_x86_decoder);
        }
        #[cfg(feature = "deflate")]
        registry.attach(method::DEFLATE, super::deflate::build_deflate_decoder);
        #[cfg(feature = "deflate64")]
        registry.attach(method::DEFLATE64, super::deflate::build_deflate64_decoder);
        #[cfg(feature = "bzip2")]
        registry.attach(method::BZIP2, super::bzip2::build_decoder);

        registry
    }
}

impl CodecRegistry {
    /// Creates a registry without any methods.
    pub fn empty() -> Self {
        Self {
            methods: Vec::new(),
        }
    }

    /// Registers a method, replacing any earlier registration of the same ID.
    pub fn register(
        &mut self,
        id: &'static [u8],
        name: &'static str,
        constructor: Option<DecoderConstructor>,
    ) {
        let info = MethodInfo {
            id,
            name,
            constructor,
        };
        match self.methods.iter_mut().find(|m| m.id == id) {
            Some(existing) => *existing = info,
            None => self.methods.push(info),
        }
    }

    fn attach(&mut self, id: &'static [u8], constructor: DecoderConstructor) {
        if let Some(existing) = self.methods.iter_mut().find(|m| m.id == id) {
            existing.constructor = Some(constructor);
        }
    }

    /// Looks up a method by ID.
    pub fn lookup(&self, id: &[u8]) -> Option<&MethodInfo> {
        let found = self.methods.iter().find(|m| m.id == id);
        log::trace!("codec lookup {:02x?}: {:?}", id, found.map(|m| m.name));
        found
    }

    /// Returns the display name of a method, `None` if unknown.
    pub fn name_of(&self, id: &[u8]) -> Option<&'static str> {
        self.lookup(id).map(|m| m.name)
    }

    /// Builds the decoder for `coder`.
    ///
    /// # Errors
    ///
    /// [`Error::UnsupportedMethod`] if the method is unknown or has no
    /// constructor, [`Error::UnsupportedFeature`] for coders with more than one
    /// output. Constructor errors are passed through.
    pub fn build(
        &self,
        coder: &Coder,
        inputs: Vec<Box<dyn Decoder>>,
        unpack_size: u64,
    ) -> Result<Box<dyn Decoder>> {
        let constructor = self
            .lookup(coder.method_id())
            .and_then(|m| m.constructor)
            .ok_or(Error::UnsupportedMethod {
                method_id: coder.method_id_u64(),
            })?;
        if coder.num_out_streams != 1 {
            return Err(Error::UnsupportedFeature {
                feature: "coders with several output streams",
            });
        }
        constructor(inputs, coder, unpack_size)
    }
}
