use anyhow::{anyhow, Result};
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, Rng, RngCore};
use sha1::Sha1;
use std::time::{SystemTime, UNIX_EPOCH};
use totp_rs::{Algorithm, TOTP};

type HmacSha1 = Hmac<Sha1>;

const MFA_SECRET_LEN: usize = 20;
const MFA_TOTP_PERIOD: u64 = 30;
const MFA_TOTP_VARIANCE: [i64; 3] = [-1, 0, 1];
const MFA_TOTP_DIGITS: u32 = 6;

const RECOVERY_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const RECOVERY_CODE_GROUPS: usize = 3;
const RECOVERY_CODE_GROUP_LEN: usize = 4;

/// Provisioning material handed to the client during 2FA setup.
#[derive(Debug, Clone)]
pub struct Provisioning {
    pub otpauth_url: String,
    /// `data:image/png;base64,...` rendering of `otpauth_url`.
    pub qr_code: String,
}

pub fn generate_totp_secret() -> String {
    let mut secret = [0u8; MFA_SECRET_LEN];
    OsRng.fill_bytes(&mut secret);
    BASE32_NOPAD.encode(&secret)
}

fn decode_secret(secret: &str) -> Option<Vec<u8>> {
    BASE32_NOPAD
        .decode(secret.trim().to_ascii_uppercase().as_bytes())
        .ok()
}

/// totp-rs only renders the otpauth URL and QR code; codes are checked by
/// [`verify_totp_code_at`] so the matched step can be recorded.
fn provisioned_totp(issuer: &str, account_name: &str, secret: &str) -> Result<TOTP> {
    let secret_bytes =
        decode_secret(secret).ok_or_else(|| anyhow!("TOTP secret is not base32"))?;
    TOTP::new(
        Algorithm::SHA1,
        MFA_TOTP_DIGITS as usize,
        0,
        MFA_TOTP_PERIOD,
        secret_bytes,
        Some(issuer.to_string()),
        account_name.to_string(),
    )
    .map_err(|err| anyhow!("TOTP init error: {err}"))
}

pub fn provisioning(issuer: &str, account_name: &str, secret: &str) -> Result<Provisioning> {
    let totp = provisioned_totp(issuer, account_name, secret)?;
    let qr = totp
        .get_qr_base64()
        .map_err(|err| anyhow!("QR gen error: {err}"))?;

    Ok(Provisioning {
        otpauth_url: totp.get_url(),
        qr_code: format!("data:image/png;base64,{qr}"),
    })
}

pub fn normalize_mfa_code(input: &str) -> Option<String> {
    let digits = input
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '-')
        .collect::<String>();

    if digits.len() == MFA_TOTP_DIGITS as usize && digits.chars().all(|ch| ch.is_ascii_digit()) {
        Some(digits)
    } else {
        None
    }
}

/// Returns the time step the code matched, if any.
pub fn verify_totp_code(secret: &str, code: &str) -> Option<u64> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    verify_totp_code_at(secret, code, now.as_secs())
}

/// Accepts the code for the step containing `unix_seconds` or either
/// neighbouring step and returns the matching step counter.
pub fn verify_totp_code_at(secret: &str, code: &str, unix_seconds: u64) -> Option<u64> {
    let secret_bytes = decode_secret(secret)?;
    let current_counter = unix_seconds / MFA_TOTP_PERIOD;

    MFA_TOTP_VARIANCE
        .iter()
        .map(|offset| current_counter.saturating_add_signed(*offset))
        .find(|counter| {
            hotp(&secret_bytes, *counter).is_some_and(|expected| format_code(expected) == code)
        })
}

/// Current code for `secret` at `unix_seconds`.
pub fn totp_code_at(secret: &str, unix_seconds: u64) -> Option<String> {
    let secret_bytes = decode_secret(secret)?;
    hotp(&secret_bytes, unix_seconds / MFA_TOTP_PERIOD).map(format_code)
}

fn format_code(code: u32) -> String {
    format!("{:0width$}", code, width = MFA_TOTP_DIGITS as usize)
}

fn hotp(secret: &[u8], counter: u64) -> Option<u32> {
    let mut mac = HmacSha1::new_from_slice(secret).ok()?;
    mac.update(&counter.to_be_bytes());
    let result = mac.finalize().into_bytes();

    let offset = (result[result.len() - 1] & 0x0f) as usize;
    let code = ((result[offset] as u32 & 0x7f) << 24)
        | ((result[offset + 1] as u32) << 16)
        | ((result[offset + 2] as u32) << 8)
        | (result[offset + 3] as u32);

    Some(code % 10u32.pow(MFA_TOTP_DIGITS))
}

pub fn generate_recovery_codes(count: usize) -> Vec<String> {
    (0..count)
        .map(|_| {
            let groups: Vec<String> = (0..RECOVERY_CODE_GROUPS)
                .map(|_| {
                    (0..RECOVERY_CODE_GROUP_LEN)
                        .map(|_| {
                            let idx = OsRng.gen_range(0..RECOVERY_CODE_ALPHABET.len());
                            RECOVERY_CODE_ALPHABET[idx] as char
                        })
                        .collect()
                })
                .collect();
            groups.join("-")
        })
        .collect()
}

/// Canonical `XXXX-XXXX-XXXX` form of a user-typed recovery code, if it is
/// one. Case, spaces and dashes are forgiven.
pub fn normalize_recovery_code(input: &str) -> Option<String> {
    let chars: Vec<char> = input
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '-')
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if chars.len() != RECOVERY_CODE_GROUPS * RECOVERY_CODE_GROUP_LEN {
        return None;
    }
    if !chars
        .iter()
        .all(|ch| ch.is_ascii() && RECOVERY_CODE_ALPHABET.contains(&(*ch as u8)))
    {
        return None;
    }

    let groups: Vec<String> = chars
        .chunks(RECOVERY_CODE_GROUP_LEN)
        .map(|chunk| chunk.iter().collect())
        .collect();
    Some(groups.join("-"))
}
