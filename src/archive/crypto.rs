//! Legacy encryption: the traditional PKWARE stream cipher used by ZIP and
//! the password XOR ("garbling") used by ARC.
//!
//! Neither scheme authenticates anything. A wrong ZIP password is usually
//! caught by the check byte at the end of the 12-byte encryption header, and
//! otherwise only by the CRC of the decoded data.

/// Length of the ZIP encryption header that precedes the compressed data.
pub const ENCRYPTION_HEADER_SIZE: usize = 12;

/// CRC32 lookup table (polynomial 0xEDB88320)
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB88320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// One raw CRC-32 step, without the usual pre/post inversion.
fn crc32_byte(crc: u32, byte: u8) -> u32 {
    (crc >> 8) ^ CRC32_TABLE[((crc ^ byte as u32) & 0xFF) as usize]
}

/// Traditional PKWARE cipher state.
#[derive(Debug, Clone)]
pub struct ZipCrypto {
    keys: [u32; 3],
}

impl ZipCrypto {
    pub fn new(password: &[u8]) -> Self {
        let mut cipher = Self {
            keys: [0x12345678, 0x23456789, 0x34567890],
        };
        for &byte in password {
            cipher.update_keys(byte);
        }
        cipher
    }

    fn update_keys(&mut self, plain: u8) {
        self.keys[0] = crc32_byte(self.keys[0], plain);
        self.keys[1] = self.keys[1]
            .wrapping_add(self.keys[0] & 0xFF)
            .wrapping_mul(134775813)
            .wrapping_add(1);
        self.keys[2] = crc32_byte(self.keys[2], (self.keys[1] >> 24) as u8);
    }

    fn keystream(&self) -> u8 {
        let temp = (self.keys[2] | 2) as u16;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }

    pub fn decrypt_byte(&mut self, byte: u8) -> u8 {
        let plain = byte ^ self.keystream();
        self.update_keys(plain);
        plain
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        for byte in data {
            *byte = self.decrypt_byte(*byte);
        }
    }

    #[cfg(test)]
    pub fn encrypt_byte(&mut self, byte: u8) -> u8 {
        let cipher = byte ^ self.keystream();
        self.update_keys(byte);
        cipher
    }
}

/// ARC password garbling: XOR with the password, repeated.
#[derive(Debug, Clone)]
pub struct ArcGarble {
    password: Vec<u8>,
    pos: usize,
}

impl ArcGarble {
    /// `None` for an empty password, which leaves data untouched.
    pub fn new(password: &[u8]) -> Option<Self> {
        (!password.is_empty()).then(|| Self {
            password: password.to_vec(),
            pos: 0,
        })
    }

    pub fn apply(&mut self, data: &mut [u8]) {
        for byte in data {
            *byte ^= self.password[self.pos];
            self.pos = (self.pos + 1) % self.password.len();
        }
    }
}

/// Per-entry decryption state used by the extractor.
pub enum Decryptor {
    Zip {
        cipher: ZipCrypto,
        /// Decrypted header bytes seen so far.
        header: Vec<u8>,
        check: u8,
        /// Set once the header has been consumed.
        verified: Option<bool>,
    },
    Arc(ArcGarble),
}

impl Decryptor {
    /// A ZIP decryptor whose header check byte should equal `check`.
    pub fn zip(password: &[u8], check: u8) -> Self {
        Decryptor::Zip {
            cipher: ZipCrypto::new(password),
            header: Vec::with_capacity(ENCRYPTION_HEADER_SIZE),
            check,
            verified: None,
        }
    }

    /// Decrypt a chunk in place, returning the part that is entry data
    /// (the ZIP encryption header is swallowed).
    pub fn apply<'b>(&mut self, chunk: &'b mut [u8]) -> &'b mut [u8] {
        match self {
            Decryptor::Zip {
                cipher,
                header,
                check,
                verified,
            } => {
                cipher.decrypt(chunk);
                let take = (ENCRYPTION_HEADER_SIZE - header.len()).min(chunk.len());
                header.extend_from_slice(&chunk[..take]);
                if verified.is_none() && header.len() == ENCRYPTION_HEADER_SIZE {
                    *verified = Some(header[ENCRYPTION_HEADER_SIZE - 1] == *check);
                }
                &mut chunk[take..]
            }
            Decryptor::Arc(garble) => {
                garble.apply(chunk);
                chunk
            }
        }
    }

    /// `Some(false)` when the ZIP check byte did not match.
    pub fn password_verified(&self) -> Option<bool> {
        match self {
            Decryptor::Zip { verified, .. } => *verified,
            Decryptor::Arc(_) => None,
        }
    }
}

/// Encrypt `plain` the way a ZIP writer would: a 12-byte header ending in
/// `check`, then the data.
#[cfg(test)]
pub fn zip_encrypt(password: &[u8], check: u8, plain: &[u8]) -> Vec<u8> {
    let mut cipher = ZipCrypto::new(password);
    let mut header = [0x5Au8; ENCRYPTION_HEADER_SIZE];
    header[ENCRYPTION_HEADER_SIZE - 1] = check;
    header
        .iter()
        .chain(plain)
        .map(|&b| cipher.encrypt_byte(b))
        .collect()
}
