//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use explorer_pool::ResultChunk;
use std::time::Duration;

/// Upper bound for anything a test waits on
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Assert a job's chunk sequence: non-final data, then exactly one terminal chunk
pub fn assert_well_formed(chunks: &[ResultChunk]) {
    let Some((last, rest)) = chunks.split_last() else {
        panic!("Expected a terminal chunk, got nothing");
    };
    assert!(last.is_terminal(), "Last chunk should be terminal: {:?}", last);
    for chunk in rest {
        assert!(
            !chunk.is_terminal(),
            "Only the last chunk may be terminal: {:?}",
            chunks
        );
    }
}

/// Extract the error message of a terminal error chunk
pub fn error_message(chunk: &ResultChunk) -> &str {
    match chunk {
        ResultChunk::Error { message, .. } => message,
        other => panic!("Expected an error chunk, got {:?}", other),
    }
}
