#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::pkcs8::EncodePublicKey;
use ed25519_dalek::Signer as _;
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::pkcs8::{EncodePublicKey as _, LineEnding};
use rsa::signature::{SignatureEncoding, Signer as _};
use rusqlite::Connection;

pub fn setup_db() -> Connection {
    let conn = Connection::open_in_memory().expect("failed to open in-memory db");
    internims_db::run_migrations(&conn).expect("failed to run migrations");
    conn
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2014, 5, 1, 12, 0, 0).unwrap()
}

/// Inserts a host row directly, bypassing registration's key cleanup.
pub fn insert_host(conn: &Connection, site_id: &str, public_key: &str, active: bool) {
    conn.execute(
        "INSERT INTO authorized_hosts (site_id, common_name, public_key, active, created_at)
         VALUES (?1, ?2, ?3, ?4, '2014-01-01T00:00:00.000000Z')",
        rusqlite::params![site_id, format!("{site_id} lab"), public_key, active],
    )
    .expect("failed to insert host");
}

pub fn stored_key(conn: &Connection, site_id: &str) -> String {
    conn.query_row(
        "SELECT public_key FROM authorized_hosts WHERE site_id = ?1",
        [site_id],
        |row| row.get(0),
    )
    .expect("host should exist")
}

pub struct Ed25519Site {
    pub signing: ed25519_dalek::SigningKey,
    pub pem: String,
}

impl Ed25519Site {
    pub fn generate() -> Self {
        let signing = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
        let pem = signing
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .expect("pem encoding");
        Self { signing, pem }
    }

    pub fn sign(&self, body: &[u8]) -> String {
        STANDARD.encode(self.signing.sign(body).to_bytes())
    }
}

pub struct RsaSite {
    pub private: rsa::RsaPrivateKey,
    pub signing: rsa::pkcs1v15::SigningKey<sha2::Sha256>,
    pub spki_pem: String,
    pub pkcs1_pem: String,
}

impl RsaSite {
    pub fn generate() -> Self {
        let private = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).expect("rsa keygen");
        let public = private.to_public_key();
        Self {
            spki_pem: public.to_public_key_pem(LineEnding::LF).expect("spki pem"),
            pkcs1_pem: public.to_pkcs1_pem(LineEnding::LF).expect("pkcs1 pem"),
            signing: rsa::pkcs1v15::SigningKey::<sha2::Sha256>::new(private.clone()),
            private,
        }
    }

    pub fn sign(&self, body: &[u8]) -> String {
        STANDARD.encode(self.signing.sign(body).to_vec())
    }

    pub fn sign_sha1(&self, body: &[u8]) -> String {
        let signing = rsa::pkcs1v15::SigningKey::<sha1::Sha1>::new(self.private.clone());
        STANDARD.encode(signing.sign(body).to_vec())
    }
}
