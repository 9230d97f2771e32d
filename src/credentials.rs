//! Bot token decryption.
//!
//! The identity file stores the bot token encrypted and base64-encoded, with
//! the base64 form of the bot id as additional entropy. Encryption happens in
//! the configuration UI; the supervisor only needs to decrypt.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

pub trait TokenCipher: Send + Sync {
    /// Decrypt a base64 token with the given entropy bytes.
    fn decrypt(&self, encrypted: &str, entropy: &[u8]) -> Result<String>;
}

/// Entropy used for a bot's token: the base64 encoding of its id.
pub fn entropy_for(bot_id: &str) -> Vec<u8> {
    BASE64.encode(bot_id.as_bytes()).into_bytes()
}

/// Cipher for the current platform.
pub fn platform_cipher() -> Box<dyn TokenCipher> {
    #[cfg(windows)]
    {
        Box::new(DpapiCipher)
    }
    #[cfg(not(windows))]
    {
        Box::new(UnprotectedCipher)
    }
}

/// Windows Data Protection API, scoped to the current user.
#[cfg(windows)]
pub struct DpapiCipher;

#[cfg(windows)]
impl TokenCipher for DpapiCipher {
    fn decrypt(&self, encrypted: &str, entropy: &[u8]) -> Result<String> {
        use windows_sys::Win32::Foundation::LocalFree;
        use windows_sys::Win32::Security::Cryptography::{CRYPT_INTEGER_BLOB, CryptUnprotectData};

        const CRYPTPROTECT_UI_FORBIDDEN: u32 = 0x1;

        let mut cipher_bytes = BASE64
            .decode(encrypted.trim())
            .context("bot token is not valid base64")?;
        let mut entropy_bytes = entropy.to_vec();

        let input = CRYPT_INTEGER_BLOB {
            cbData: cipher_bytes.len() as u32,
            pbData: cipher_bytes.as_mut_ptr(),
        };
        let entropy_blob = CRYPT_INTEGER_BLOB {
            cbData: entropy_bytes.len() as u32,
            pbData: entropy_bytes.as_mut_ptr(),
        };
        let mut output = CRYPT_INTEGER_BLOB {
            cbData: 0,
            pbData: std::ptr::null_mut(),
        };

        let ok = unsafe {
            CryptUnprotectData(
                &input,
                std::ptr::null_mut(),
                &entropy_blob,
                std::ptr::null(),
                std::ptr::null(),
                CRYPTPROTECT_UI_FORBIDDEN,
                &mut output,
            )
        };
        if ok == 0 {
            anyhow::bail!(
                "CryptUnprotectData failed: {}",
                std::io::Error::last_os_error()
            );
        }

        let plain = unsafe {
            std::slice::from_raw_parts(output.pbData, output.cbData as usize).to_vec()
        };
        unsafe {
            LocalFree(output.pbData as _);
        }
        String::from_utf8(plain).context("decrypted bot token is not UTF-8")
    }
}

/// Hosts without DPAPI store the token base64-encoded but unencrypted.
#[cfg(not(windows))]
pub struct UnprotectedCipher;

#[cfg(not(windows))]
impl TokenCipher for UnprotectedCipher {
    fn decrypt(&self, encrypted: &str, _entropy: &[u8]) -> Result<String> {
        let bytes = BASE64
            .decode(encrypted.trim())
            .context("bot token is not valid base64")?;
        String::from_utf8(bytes).context("bot token is not UTF-8")
    }
}
