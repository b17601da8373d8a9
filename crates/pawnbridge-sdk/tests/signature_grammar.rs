//! Exhaustive checks of the outbound signature grammar over short signatures.

use pawnbridge_sdk::{Signature, SignatureError};

const ALPHABET: [char; 7] = ['i', 'f', 's', 'a', 'I', 'F', 'S'];

fn all_signatures(max_len: usize) -> Vec<String> {
    let mut result = vec![String::new()];
    let mut frontier = vec![String::new()];
    for _ in 0..max_len {
        let mut next = Vec::new();
        for prefix in &frontier {
            for character in ALPHABET {
                let mut signature = prefix.clone();
                signature.push(character);
                next.push(signature);
            }
        }
        result.extend(next.iter().cloned());
        frontier = next;
    }
    result
}

#[test]
fn test_counts_match_hand_computed_expectation() {
    for signature in all_signatures(4) {
        let plain = signature.chars().filter(|c| c.is_ascii_lowercase()).count();
        let references = signature.chars().filter(|c| c.is_ascii_uppercase()).count();
        let ordered = !signature
            .chars()
            .skip_while(|c| c.is_ascii_lowercase())
            .any(|c| c.is_ascii_lowercase());

        match Signature::parse(&signature) {
            Ok(parsed) => {
                assert!(ordered, "{signature} should have been rejected");
                assert_eq!(parsed.argument_count(), plain, "{signature}");
                assert_eq!(parsed.reference_count(), references, "{signature}");
                assert_eq!(parsed.len(), signature.len());
            }
            Err(SignatureError::PlainAfterReference { .. }) => {
                assert!(!ordered, "{signature} should have parsed");
            }
            Err(error) => panic!("unexpected error for {signature}: {error}"),
        }
    }
}

#[test]
fn test_error_messages_name_the_position() {
    let error = Signature::parse("iSi").unwrap_err();
    assert_eq!(
        error.to_string(),
        "Plain argument 'i' at position 2 follows a reference argument"
    );
}
