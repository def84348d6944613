//! Declared shape of the exported interface.
//!
//! Both the scaffolding and the binding derive their compatibility guards
//! from these declarations: a contract version for the protocol itself and
//! a checksum per exported function.

use sha1::{Digest, Sha1};

/// Version of the buffer/status protocol implemented by this crate.
pub const CONTRACT_VERSION: u32 = 22;

/// Prefix of every exported symbol.
pub const NAMESPACE: &str = "wirecall";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arg {
    pub name: &'static str,
    pub ty: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FnSignature {
    pub name: &'static str,
    pub args: &'static [Arg],
    pub returns: Option<&'static str>,
    pub throws: Option<&'static str>,
    pub is_async: bool,
}

impl FnSignature {
    /// Stable textual form hashed into the checksum.
    pub fn canonical(&self) -> String {
        let args = self
            .args
            .iter()
            .map(|arg| format!("{}: {}", arg.name, arg.ty))
            .collect::<Vec<_>>()
            .join(", ");
        let mut out = format!("{NAMESPACE}.{}({args})", self.name);
        if self.is_async {
            out.push_str(" async");
        }
        if let Some(returns) = self.returns {
            out.push_str(" -> ");
            out.push_str(returns);
        }
        if let Some(throws) = self.throws {
            out.push_str(" throws ");
            out.push_str(throws);
        }
        out
    }

    /// First two bytes of the SHA-1 of the canonical signature.
    pub fn checksum(&self) -> u16 {
        let digest = Sha1::digest(self.canonical().as_bytes());
        u16::from_be_bytes([digest[0], digest[1]])
    }

    pub fn symbol(&self) -> String {
        format!("{NAMESPACE}_fn_func_{}", self.name)
    }

    pub fn checksum_symbol(&self) -> String {
        format!("{NAMESPACE}_checksum_func_{}", self.name)
    }
}

pub const TEST_FN: FnSignature = FnSignature {
    name: "test_fn",
    args: &[Arg {
        name: "type_param",
        ty: "CustomType",
    }],
    returns: None,
    throws: None,
    is_async: false,
};

pub const TEST_FN_ASYNC: FnSignature = FnSignature {
    name: "test_fn_async",
    args: &[Arg {
        name: "type_param",
        ty: "CustomType",
    }],
    returns: None,
    throws: None,
    is_async: true,
};

pub const FUNCTIONS: &[FnSignature] = &[TEST_FN, TEST_FN_ASYNC];

pub fn contract_version_symbol() -> String {
    format!("ffi_{NAMESPACE}_uniffi_contract_version")
}
