mod common;

use common::{insert_host, setup_db, stored_key, t0, Ed25519Site, RsaSite};
use internims_auth::{authenticate, AuthDecision, AuthMethod, DenyReason};

const BODY: &[u8] = br#"{"site":"alpha","api_uri":"https://alpha.example.org/api","users":[]}"#;

fn signed<'a>(message: &'a [u8], authorization: &'a str) -> AuthMethod<'a> {
    AuthMethod::Signature {
        message,
        authorization,
    }
}

#[test]
fn ed25519_signature_is_allowed() {
    let conn = setup_db();
    let site = Ed25519Site::generate();
    insert_host(&conn, "alpha", &site.pem, true);

    let header = site.sign(BODY);
    let decision = authenticate(&conn, "alpha", signed(BODY, &header), t0()).unwrap();

    let AuthDecision::Allow(host) = decision else {
        panic!("expected allow, got {decision:?}");
    };
    assert_eq!(host.site_id, "alpha");
    assert_eq!(host.common_name(), Some("alpha lab"));
}

#[test]
fn rsa_signatures_are_allowed_for_both_key_encodings() {
    let conn = setup_db();
    let site = RsaSite::generate();
    insert_host(&conn, "spki", &site.spki_pem, true);
    insert_host(&conn, "pkcs1", &site.pkcs1_pem, true);

    let header = format!("Signature {}", site.sign(BODY));
    for site_id in ["spki", "pkcs1"] {
        let decision = authenticate(&conn, site_id, signed(BODY, &header), t0()).unwrap();
        assert!(
            matches!(decision, AuthDecision::Allow(_)),
            "{site_id}: {decision:?}"
        );
    }
}

#[test]
fn rsa_sha1_signature_is_allowed() {
    let conn = setup_db();
    let site = RsaSite::generate();
    insert_host(&conn, "alpha", &site.spki_pem, true);

    let body = br#"{"iid":"alpha","api_uri":"https://alpha.example.org/api","users":[]}"#;
    let header = site.sign_sha1(body);
    let decision = authenticate(&conn, "alpha", signed(body, &header), t0()).unwrap();
    assert!(matches!(decision, AuthDecision::Allow(_)), "{decision:?}");

    let tampered = authenticate(&conn, "alpha", signed(b"{}", &header), t0()).unwrap();
    assert_eq!(tampered, AuthDecision::Deny(DenyReason::BadSignature));
}

#[test]
fn tampered_body_is_denied() {
    let conn = setup_db();
    let site = Ed25519Site::generate();
    insert_host(&conn, "alpha", &site.pem, true);

    let header = site.sign(BODY);
    let decision = authenticate(&conn, "alpha", signed(b"{\"site\":\"alpha\"}", &header), t0())
        .unwrap();
    assert_eq!(decision, AuthDecision::Deny(DenyReason::BadSignature));
}

#[test]
fn signature_from_another_key_is_denied() {
    let conn = setup_db();
    let registered = Ed25519Site::generate();
    let impostor = Ed25519Site::generate();
    insert_host(&conn, "alpha", &registered.pem, true);

    let header = impostor.sign(BODY);
    let decision = authenticate(&conn, "alpha", signed(BODY, &header), t0()).unwrap();
    assert_eq!(decision, AuthDecision::Deny(DenyReason::BadSignature));
}

#[test]
fn garbage_header_is_malformed() {
    let conn = setup_db();
    let site = Ed25519Site::generate();
    insert_host(&conn, "alpha", &site.pem, true);

    let decision = authenticate(&conn, "alpha", signed(BODY, "%%%"), t0()).unwrap();
    assert_eq!(decision, AuthDecision::Deny(DenyReason::MalformedSignature));
}

#[test]
fn unknown_and_inactive_sites_are_not_authorized() {
    let conn = setup_db();
    let site = Ed25519Site::generate();
    insert_host(&conn, "dormant", &site.pem, false);

    let header = site.sign(BODY);
    for site_id in ["ghost", "dormant"] {
        let decision = authenticate(&conn, site_id, signed(BODY, &header), t0()).unwrap();
        assert_eq!(decision, AuthDecision::Deny(DenyReason::NotAuthorized));
    }
}

#[test]
fn crlf_key_is_normalized_only_after_success() {
    let conn = setup_db();
    let site = Ed25519Site::generate();
    let crlf = site.pem.replace('\n', "\r\n");
    insert_host(&conn, "alpha", &crlf, true);

    let bad = authenticate(&conn, "alpha", signed(BODY, &Ed25519Site::generate().sign(BODY)), t0())
        .unwrap();
    assert_eq!(bad, AuthDecision::Deny(DenyReason::BadSignature));
    assert_eq!(stored_key(&conn, "alpha"), crlf);

    let header = site.sign(BODY);
    let good = authenticate(&conn, "alpha", signed(BODY, &header), t0()).unwrap();
    let AuthDecision::Allow(host) = good else {
        panic!("expected allow, got {good:?}");
    };
    assert_eq!(host.public_key, site.pem);
    assert_eq!(stored_key(&conn, "alpha"), site.pem);
}

#[test]
fn unparsable_stored_key_is_unusable() {
    let conn = setup_db();
    insert_host(&conn, "alpha", "not a pem", true);

    let decision = authenticate(&conn, "alpha", signed(BODY, "AAAA"), t0()).unwrap();
    assert_eq!(decision, AuthDecision::Deny(DenyReason::UnusableKey));
}
