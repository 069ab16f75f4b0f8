// Batch generation: many independent phrases on a worker pool.
//
// Each request is a separate unit of work with its own seed and its own
// candidate-pool cache; workers share only the read-only `Generator`. Results
// come back in request order, one `Result` per request, so one bad request
// does not sink the rest of the batch. Output is identical for any worker
// count.

use crate::config::GenerationRequest;
use crate::error::{GenError, Result};
use crate::generator::Generator;
use crate::phrase::Phrase;
use crate::pool::CandidatePoolCache;
use log::debug;
use rayon::prelude::*;

impl Generator {
    /// Generate every request, serially for `workers == 1`, otherwise on a
    /// dedicated rayon pool of `workers` threads.
    pub fn generate_batch(
        &self,
        requests: &[GenerationRequest],
        workers: usize,
    ) -> Result<Vec<Result<Phrase>>> {
        if workers == 0 {
            return Err(GenError::config("batch needs at least one worker"));
        }
        debug!("batch of {} requests on {workers} workers", requests.len());
        if workers == 1 {
            let mut cache = CandidatePoolCache::new();
            return Ok(requests
                .iter()
                .map(|r| self.generate_with_cache(r, &mut cache))
                .collect());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| GenError::config(format!("cannot start worker pool: {e}")))?;
        Ok(pool.install(|| {
            requests
                .par_iter()
                .map_init(CandidatePoolCache::new, |cache, r| {
                    self.generate_with_cache(r, cache)
                })
                .collect()
        }))
    }
}

/// `Generator::new().generate_batch(requests, workers)`.
pub fn generate_batch(
    requests: &[GenerationRequest],
    workers: usize,
) -> Result<Vec<Result<Phrase>>> {
    Generator::new().generate_batch(requests, workers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requests() -> Vec<GenerationRequest> {
        (0..6)
            .map(|seed| GenerationRequest {
                seed,
                note_count: 12,
                harmony_lines: (seed % 2) as i64,
                ..GenerationRequest::default()
            })
            .collect()
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(
            generate_batch(&requests(), 0),
            Err(GenError::Configuration(_))
        ));
    }

    #[test]
    fn test_batch_matches_serial() {
        let requests = requests();
        let serial = generate_batch(&requests, 1).unwrap();
        let parallel = generate_batch(&requests, 3).unwrap();
        assert_eq!(serial.len(), requests.len());
        for ((s, p), request) in serial.iter().zip(&parallel).zip(&requests) {
            let (s, p) = (s.as_ref().unwrap(), p.as_ref().unwrap());
            assert_eq!(s.seed, request.seed);
            assert_eq!(s.voices, p.voices);
            assert_eq!(s.chords, p.chords);
        }
    }

    #[test]
    fn test_bad_request_does_not_sink_batch() {
        let mut requests = requests();
        requests[2].key = "X".into();
        let results = generate_batch(&requests, 2).unwrap();
        assert!(matches!(results[2], Err(GenError::InvalidKey(_))));
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 5);
    }
}
