//! Scan engine.
//!
//! A scan drives a [`ScanOperator`] over `N` synchronized input streams and `M` output sinks.
//! At every step the operator sees the current record of each input, emits at most one record
//! per output, and decides which inputs it has consumed. The engine refills consumed inputs and
//! repeats until the operator reports [`ScanFlow::Done`].

use std::array;

use crate::error::{Error, Result};
use crate::stream::RecordSink;

/// Result of a single scan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFlow {
    Continue,
    Done,
}

/// Current records of the scan inputs.
pub struct ScanInput<T, const N: usize> {
    items: [Option<T>; N],
    kept: [bool; N],
}

impl<T, const N: usize> ScanInput<T, N> {
    fn new() -> Self {
        ScanInput {
            items: array::from_fn(|_| None),
            kept: [false; N],
        }
    }

    /// Returns the current record of input `idx`, [`None`] if the input is exhausted.
    pub fn get(&self, idx: usize) -> Option<&T> {
        self.items[idx].as_ref()
    }

    /// Leaves the current record of input `idx` in place for the next step.
    pub fn keep(&mut self, idx: usize) {
        self.kept[idx] = true;
    }

    /// Checks if every input is exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.items.iter().all(Option::is_none)
    }

    /// Drops the records the operator did not keep. Returns `true` if any was dropped.
    fn consume(&mut self) -> bool {
        let mut consumed = false;
        for (item, kept) in self.items.iter_mut().zip(self.kept.iter_mut()) {
            if !*kept && item.take().is_some() {
                consumed = true;
            }
            *kept = false;
        }
        return consumed;
    }
}

/// Records emitted by a single scan step.
pub struct ScanOutput<T, const M: usize> {
    items: [Option<T>; M],
}

impl<T, const M: usize> ScanOutput<T, M> {
    fn new() -> Self {
        ScanOutput {
            items: array::from_fn(|_| None),
        }
    }

    /// Emits `item` to output `idx`.
    pub fn emit(&mut self, idx: usize, item: T) {
        self.items[idx] = Some(item);
    }
}

/// Stateful per-record transformation driven by [`scan`].
pub trait ScanOperator<T, const N: usize, const M: usize> {
    /// Resets the operator state before a scan starts.
    fn initialize(&mut self) {}

    /// Processes the current input records.
    fn operate(&mut self, input: &mut ScanInput<T, N>, output: &mut ScanOutput<T, M>) -> Result<ScanFlow>;
}

/// Applies `operator` to the `inputs` until it is done, writing emitted records to `outputs`.
///
/// # Arguments
/// * `inputs` - Input record streams
/// * `operator` - Transformation to be applied
/// * `outputs` - Sinks the transformation writes to
pub fn scan<T, I, O, S, const N: usize, const M: usize>(
    inputs: [I; N],
    operator: &mut O,
    mut outputs: [&mut S; M],
) -> Result<()>
where
    I: IntoIterator<Item = Result<T>>,
    O: ScanOperator<T, N, M>,
    S: RecordSink<T> + ?Sized,
{
    let mut sources = inputs.map(|input| input.into_iter().fuse());
    let mut input = ScanInput::new();
    let mut output = ScanOutput::new();

    operator.initialize();

    loop {
        for (item, source) in input.items.iter_mut().zip(sources.iter_mut()) {
            if item.is_none() {
                *item = source.next().transpose()?;
            }
        }

        let flow = operator.operate(&mut input, &mut output)?;

        let mut emitted = false;
        for (item, sink) in output.items.iter_mut().zip(outputs.iter_mut()) {
            if let Some(item) = item.take() {
                sink.push(item)?;
                emitted = true;
            }
        }

        if flow == ScanFlow::Done {
            return Ok(());
        }

        if !input.consume() && !emitted {
            return Err(Error::LogicInvariant(
                "scan step neither consumed input nor produced output".to_string(),
            ));
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{scan, ScanFlow, ScanInput, ScanOperator, ScanOutput};
    use crate::error::{Error, Result};

    /// Merges two sorted inputs, sending odd numbers to the second output.
    struct SplitMerge;

    impl ScanOperator<u32, 2, 2> for SplitMerge {
        fn operate(&mut self, input: &mut ScanInput<u32, 2>, output: &mut ScanOutput<u32, 2>) -> Result<ScanFlow> {
            let item = match (input.get(0).copied(), input.get(1).copied()) {
                (None, None) => return Ok(ScanFlow::Done),
                (Some(a), Some(b)) if a <= b => {
                    input.keep(1);
                    a
                }
                (Some(_), Some(b)) => {
                    input.keep(0);
                    b
                }
                (Some(a), None) => a,
                (None, Some(b)) => b,
            };
            output.emit((item % 2) as usize, item);
            Ok(ScanFlow::Continue)
        }
    }

    struct Stall;

    impl ScanOperator<u32, 1, 1> for Stall {
        fn operate(&mut self, input: &mut ScanInput<u32, 1>, _: &mut ScanOutput<u32, 1>) -> Result<ScanFlow> {
            input.keep(0);
            Ok(ScanFlow::Continue)
        }
    }

    fn ok(items: Vec<u32>) -> Vec<Result<u32>> {
        items.into_iter().map(Ok).collect()
    }

    #[rstest]
    #[case(vec![], vec![], vec![], vec![])]
    #[case(vec![1, 4, 6], vec![2, 3, 9], vec![2, 4, 6], vec![1, 3, 9])]
    #[case(vec![5], vec![], vec![], vec![5])]
    fn test_two_way_scan(
        #[case] a: Vec<u32>,
        #[case] b: Vec<u32>,
        #[case] even: Vec<u32>,
        #[case] odd: Vec<u32>,
    ) {
        let mut actual_even = Vec::new();
        let mut actual_odd = Vec::new();

        scan([ok(a), ok(b)], &mut SplitMerge, [&mut actual_even, &mut actual_odd]).unwrap();

        assert_eq!(actual_even, even);
        assert_eq!(actual_odd, odd);
    }

    #[test]
    fn test_stalled_operator() {
        let mut out: Vec<u32> = Vec::new();
        let result = scan([ok(vec![1])], &mut Stall, [&mut out]);
        assert!(matches!(result, Err(Error::LogicInvariant(_))));
    }

    #[test]
    fn test_input_error_is_propagated() {
        let input = vec![Ok(1), Err(Error::LogicInvariant("broken".to_string()))];
        let mut even = Vec::new();
        let mut odd = Vec::new();

        let result = scan([input, vec![]], &mut SplitMerge, [&mut even, &mut odd]);
        assert!(matches!(result, Err(Error::LogicInvariant(msg)) if msg == "broken"));
        assert_eq!(odd, vec![1]);
    }
}
