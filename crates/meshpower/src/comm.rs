//! The process-group abstraction used to coordinate SPMD workers.
//!
//! Every distributed piece of this crate is written against the
//! [`Communicator`] trait: a fixed group of cooperating workers executing
//! the same program over disjoint data partitions, coordinated purely
//! through the collective operations below. There are no message queues
//! and no shared memory.
//!
//! The methods are all collective: they are designed to be entered by
//! every rank of the group "at the same time". Calls should be written
//! *as if* there is a barrier at the start of the method that hangs until
//! all ranks catch up (whether there is a barrier is an implementation
//! detail). A rank that skips a collective call deadlocks the group, so
//! code paths that can fail locally must route their failure through
//! [`agree`] *inside* the same collective round instead of returning
//! early.
//!
//! This crate ships [`SerialComm`], a single-rank implementation for
//! which every collective degenerates to a copy (or a no-op). An
//! MPI-backed implementation would wrap the corresponding collectives;
//! the distributed code in this crate never needs to know the difference.

use num_complex::Complex64;

use crate::error::Error;

/// Handle to a fixed group of SPMD workers providing collective
/// communication.
///
/// All methods are collective (see the module docs). `root`-taking
/// methods must be passed the same `root` on every rank.
pub trait Communicator {
    /// this worker's id, in `0..size()`
    fn rank(&self) -> usize;

    /// the number of cooperating workers
    fn size(&self) -> usize;

    /// element-wise all-reduce sum; every rank ends up with the total
    fn sum_f64s(&self, buf: &mut [f64]);

    /// element-wise all-reduce sum for counters
    fn sum_u64s(&self, buf: &mut [u64]);

    /// element-wise all-reduce sum for complex accumulators
    fn sum_complex(&self, buf: &mut [Complex64]);

    /// logical-OR all-reduce; used to agree on error status
    fn any(&self, local: bool) -> bool;

    /// broadcast `buf` from `root` to every rank (`buf` must have the
    /// same length everywhere)
    fn bcast_f64s(&self, root: usize, buf: &mut [f64]);

    /// broadcast a byte buffer from `root`; non-root buffers are resized
    /// to match
    fn bcast_bytes(&self, root: usize, buf: &mut Vec<u8>);

    /// concatenate every rank's `local` on `root` (rank order); returns
    /// `None` on the other ranks
    fn gather_f64s(&self, root: usize, local: &[f64]) -> Option<Vec<f64>>;

    /// concatenate every rank's `local` on `root` (rank order); returns
    /// `None` on the other ranks
    fn gather_complex(&self, root: usize, local: &[Complex64]) -> Option<Vec<Complex64>>;

    /// inverse of [`Communicator::gather_f64s`]: `root` provides the
    /// concatenated buffer and every rank receives its `count`-sized chunk
    fn scatter_f64s(&self, root: usize, full: Option<&[f64]>, count: usize) -> Vec<f64>;

    /// inverse of [`Communicator::gather_complex`]
    fn scatter_complex(
        &self,
        root: usize,
        full: Option<&[Complex64]>,
        count: usize,
    ) -> Vec<Complex64>;
}

/// Agree on the outcome of a fallible local step during a collective
/// phase.
///
/// Every rank must call this with its local result. If any rank failed,
/// every rank comes out of the call with an error (its own, if it had
/// one), so the group raises together instead of leaving some ranks
/// blocked in the next collective.
pub fn agree<T>(comm: &dyn Communicator, result: Result<T, Error>) -> Result<T, Error> {
    let failed_somewhere = comm.any(result.is_err());
    match result {
        Err(err) => Err(err),
        Ok(_) if failed_somewhere => Err(Error::internal(
            "a cooperating worker reported an error during a collective phase",
        )),
        Ok(value) => Ok(value),
    }
}

/// The single-worker process group.
///
/// Every collective is trivially satisfied by one rank; this is both the
/// default for single-process runs and the reference against which a
/// parallel implementation must produce bit-identical results.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn sum_f64s(&self, _buf: &mut [f64]) {}

    fn sum_u64s(&self, _buf: &mut [u64]) {}

    fn sum_complex(&self, _buf: &mut [Complex64]) {}

    fn any(&self, local: bool) -> bool {
        local
    }

    fn bcast_f64s(&self, _root: usize, _buf: &mut [f64]) {}

    fn bcast_bytes(&self, _root: usize, _buf: &mut Vec<u8>) {}

    fn gather_f64s(&self, _root: usize, local: &[f64]) -> Option<Vec<f64>> {
        Some(local.to_vec())
    }

    fn gather_complex(&self, _root: usize, local: &[Complex64]) -> Option<Vec<Complex64>> {
        Some(local.to_vec())
    }

    fn scatter_f64s(&self, _root: usize, full: Option<&[f64]>, count: usize) -> Vec<f64> {
        let full = full.expect("the root rank must provide the scatter buffer");
        debug_assert_eq!(full.len(), count);
        full.to_vec()
    }

    fn scatter_complex(
        &self,
        _root: usize,
        full: Option<&[Complex64]>,
        count: usize,
    ) -> Vec<Complex64> {
        let full = full.expect("the root rank must provide the scatter buffer");
        debug_assert_eq!(full.len(), count);
        full.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_collectives_are_identities() {
        let comm = SerialComm;
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.size(), 1);

        let mut buf = [1.0, 2.0, 3.0];
        comm.sum_f64s(&mut buf);
        assert_eq!(buf, [1.0, 2.0, 3.0]);

        let gathered = comm.gather_f64s(0, &buf).unwrap();
        assert_eq!(gathered, vec![1.0, 2.0, 3.0]);

        let scattered = comm.scatter_f64s(0, Some(&gathered), 3);
        assert_eq!(scattered, gathered);
    }

    #[test]
    fn agree_propagates_local_error() {
        let comm = SerialComm;
        let ok: Result<i32, Error> = agree(&comm, Ok(7));
        assert_eq!(ok.unwrap(), 7);

        let err: Result<i32, Error> = agree(&comm, Err(Error::internal("boom")));
        assert!(err.is_err());
    }
}
