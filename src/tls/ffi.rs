//! Engine calls the `openssl` crate does not wrap
//!
//! Each wrapper takes a borrowed engine object; raw pointers stay inside
//! this module.

use foreign_types_shared::{ForeignType, ForeignTypeRef};
use libc::{c_char, c_int, c_long, c_void};
use openssl::nid::Nid;
use openssl::pkey::{PKey, Public};
use openssl::ssl::{SslCipherRef, SslContextBuilder, SslRef};
use openssl::x509::X509NameRef;
use std::ffi::CStr;
use std::ptr;

#[allow(non_camel_case_types)]
mod sys {
    use libc::{c_char, c_int, c_void};
    pub use openssl_sys::{EVP_PKEY, SSL, SSL_CIPHER, SSL_CTX, X509, X509_NAME};

    pub type ClientCertCb =
        unsafe extern "C" fn(ssl: *mut SSL, x509: *mut *mut X509, pkey: *mut *mut EVP_PKEY) -> c_int;

    pub enum COMP_METHOD {}
    pub enum SSL_COMP {}
    pub enum OPENSSL_STACK {}

    extern "C" {
        pub fn SSL_get_early_data_status(s: *const SSL) -> c_int;
        pub fn SSL_renegotiate(s: *mut SSL) -> c_int;
        pub fn SSL_CTX_set_client_cert_cb(ctx: *mut SSL_CTX, cb: Option<ClientCertCb>);
        pub fn SSL_get_peer_signature_type_nid(s: *const SSL, pnid: *mut c_int) -> c_int;
        pub fn SSL_get_pending_cipher(s: *const SSL) -> *const SSL_CIPHER;
        pub fn SSL_get_client_CA_list(s: *const SSL) -> *mut OPENSSL_STACK;
        pub fn SSL_get_current_compression(s: *const SSL) -> *const COMP_METHOD;
        pub fn SSL_version(s: *const SSL) -> c_int;
        pub fn SSL_get_cipher_list(s: *const SSL, n: c_int) -> *const c_char;
        pub fn SSL_CIPHER_get_protocol_id(c: *const SSL_CIPHER) -> u16;
        pub fn SSL_CIPHER_standard_name(c: *const SSL_CIPHER) -> *const c_char;
        pub fn SSL_COMP_get_compression_methods() -> *mut OPENSSL_STACK;
        pub fn SSL_COMP_get0_name(comp: *const SSL_COMP) -> *const c_char;
        pub fn SSL_COMP_get_name(comp: *const COMP_METHOD) -> *const c_char;
        pub fn OPENSSL_sk_num(st: *const OPENSSL_STACK) -> c_int;
        pub fn OPENSSL_sk_value(st: *const OPENSSL_STACK, i: c_int) -> *mut c_void;
    }
}

const SSL_CTRL_GET_RI_SUPPORT: c_int = 76;
const SSL_CTRL_GET_PEER_SIGNATURE_NID: c_int = 108;
const SSL_CTRL_GET_PEER_TMP_KEY: c_int = 109;

/// Returning -1 suspends the handshake with `SSL_ERROR_WANT_X509_LOOKUP`
unsafe extern "C" fn defer_client_cert(
    _ssl: *mut sys::SSL,
    _x509: *mut *mut sys::X509,
    _pkey: *mut *mut sys::EVP_PKEY,
) -> c_int {
    -1
}

/// Stop the handshake when the server asks for a certificate we lack
///
/// A certificate loaded on the context takes precedence; the callback only
/// runs when there is none.
pub(crate) fn defer_client_certificate(ctx: &mut SslContextBuilder) {
    unsafe { sys::SSL_CTX_set_client_cert_cb(ctx.as_ptr(), Some(defer_client_cert)) }
}

/// Public key the peer sent for the ephemeral key exchange
pub(crate) fn peer_tmp_key(ssl: &SslRef) -> Option<PKey<Public>> {
    let mut key: *mut sys::EVP_PKEY = ptr::null_mut();
    let ret = unsafe {
        openssl_sys::SSL_ctrl(
            ssl.as_ptr(),
            SSL_CTRL_GET_PEER_TMP_KEY,
            0,
            &mut key as *mut *mut sys::EVP_PKEY as *mut c_void,
        )
    };
    if ret <= 0 || key.is_null() {
        return None;
    }
    // SAFETY: the control hands out a new reference to the key
    Some(unsafe { PKey::from_ptr(key) })
}

/// `SSL_get_early_data_status`: 0 not sent, 1 rejected, 2 accepted
pub(crate) fn early_data_status(ssl: &SslRef) -> c_int {
    unsafe { sys::SSL_get_early_data_status(ssl.as_ptr()) }
}

/// Schedule a renegotiation; false when the engine refuses
pub(crate) fn renegotiate(ssl: &SslRef) -> bool {
    unsafe { sys::SSL_renegotiate(ssl.as_ptr()) == 1 }
}

/// Raw negotiated protocol version, e.g. 0x0303
pub(crate) fn version(ssl: &SslRef) -> c_int {
    unsafe { sys::SSL_version(ssl.as_ptr()) }
}

/// Enabled cipher names in priority order
pub(crate) fn cipher_list(ssl: &SslRef) -> Vec<String> {
    let mut names = Vec::new();
    for priority in 0.. {
        match unsafe { owned_str(sys::SSL_get_cipher_list(ssl.as_ptr(), priority)) } {
            Some(name) => names.push(name),
            None => break,
        }
    }
    names
}

/// Cipher chosen by the ServerHello, before the handshake completes
pub(crate) fn pending_cipher(ssl: &SslRef) -> Option<&SslCipherRef> {
    unsafe {
        let cipher = sys::SSL_get_pending_cipher(ssl.as_ptr());
        if cipher.is_null() {
            None
        } else {
            Some(SslCipherRef::from_ptr(cipher as *mut _))
        }
    }
}

pub(crate) fn cipher_protocol_id(cipher: &SslCipherRef) -> u16 {
    unsafe { sys::SSL_CIPHER_get_protocol_id(cipher.as_ptr()) }
}

pub(crate) fn cipher_standard_name(cipher: &SslCipherRef) -> Option<String> {
    unsafe { owned_str(sys::SSL_CIPHER_standard_name(cipher.as_ptr())) }
}

/// Short name of the digest the peer signed with
pub(crate) fn peer_signature_digest(ssl: &SslRef) -> Option<&'static str> {
    let mut nid: c_int = 0;
    let ret = unsafe {
        openssl_sys::SSL_ctrl(
            ssl.as_ptr(),
            SSL_CTRL_GET_PEER_SIGNATURE_NID,
            0,
            &mut nid as *mut c_int as *mut c_void,
        )
    };
    nid_short_name(ret, nid)
}

/// Short name of the signature algorithm the peer signed with
pub(crate) fn peer_signature_type(ssl: &SslRef) -> Option<&'static str> {
    let mut nid: c_int = 0;
    let ret = unsafe { sys::SSL_get_peer_signature_type_nid(ssl.as_ptr(), &mut nid) };
    nid_short_name(ret as c_long, nid)
}

pub(crate) fn secure_renegotiation_support(ssl: &SslRef) -> bool {
    unsafe {
        openssl_sys::SSL_ctrl(ssl.as_ptr(), SSL_CTRL_GET_RI_SUPPORT, 0, ptr::null_mut()) != 0
    }
}

/// Distinguished names the server sent with its certificate request
pub(crate) fn client_ca_names(ssl: &SslRef) -> Vec<&X509NameRef> {
    unsafe {
        let stack = sys::SSL_get_client_CA_list(ssl.as_ptr());
        stack_items(stack)
            .map(|name| X509NameRef::from_ptr(name as *mut sys::X509_NAME))
            .collect()
    }
}

/// Compression in use on this connection
pub(crate) fn current_compression(ssl: &SslRef) -> Option<String> {
    unsafe {
        let method = sys::SSL_get_current_compression(ssl.as_ptr());
        if method.is_null() {
            return None;
        }
        owned_str(sys::SSL_COMP_get_name(method))
    }
}

/// Compression methods compiled into the engine
pub(crate) fn compression_methods() -> Vec<String> {
    unsafe {
        let stack = sys::SSL_COMP_get_compression_methods();
        stack_items(stack)
            .filter_map(|comp| owned_str(sys::SSL_COMP_get0_name(comp as *const sys::SSL_COMP)))
            .collect()
    }
}

fn nid_short_name(ret: c_long, nid: c_int) -> Option<&'static str> {
    if ret <= 0 {
        return None;
    }
    let nid = Nid::from_raw(nid);
    if nid == Nid::UNDEF {
        return None;
    }
    nid.short_name().ok()
}

unsafe fn stack_items(stack: *mut sys::OPENSSL_STACK) -> impl Iterator<Item = *mut c_void> {
    let count = if stack.is_null() {
        0
    } else {
        sys::OPENSSL_sk_num(stack).max(0)
    };
    (0..count)
        .map(move |i| sys::OPENSSL_sk_value(stack, i))
        .filter(|item| !item.is_null())
}

unsafe fn owned_str(s: *const c_char) -> Option<String> {
    if s.is_null() {
        None
    } else {
        Some(CStr::from_ptr(s).to_string_lossy().into_owned())
    }
}
