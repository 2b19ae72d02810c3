//! `range()` with a native fast path.
//!
//! Operands that already fit a machine integer are enumerated directly.
//! When any coerced operand does not fit, the whole call is handed to the
//! host's own `range` built-in, which works in arbitrary precision.

use std::num::NonZeroI64;

use shimrt_core::{Host, ObjRef, Owned};

use crate::error::{ShimError, ShimResult};
use crate::runtime::Shim;

const UNIT_STEP: NonZeroI64 = NonZeroI64::new(1).unwrap();

/// Operands of the object-argument overloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeArgs {
    /// `range(stop)`
    Stop(ObjRef),
    /// `range(start, stop)`
    StartStop(ObjRef, ObjRef),
    /// `range(start, stop, step)`
    StartStopStep(ObjRef, ObjRef, ObjRef),
}

impl RangeArgs {
    pub fn arity(&self) -> usize {
        match self {
            RangeArgs::Stop(_) => 1,
            RangeArgs::StartStop(..) => 2,
            RangeArgs::StartStopStep(..) => 3,
        }
    }
}

/// Enumerate `start, start + step, ...` up to (excluding) `end`.
///
/// Generation stops early rather than wrap if the next value would
/// overflow.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn range_native<H: Host>(
    host: &H,
    start: i64,
    end: i64,
    step: NonZeroI64,
) -> ShimResult<Owned<'_, H>> {
    let list = host.own(host.new_list()?);
    let step = step.get();
    let mut value = start;
    while (step > 0 && value < end) || (step < 0 && value > end) {
        let number = host.own(host.new_int(value)?);
        host.list_append(list.get(), number.get())?;
        match value.checked_add(step) {
            Some(next) => value = next,
            None => break,
        }
    }
    Ok(list)
}

/// `range(boundary)` over literals.
pub fn range1<H: Host>(host: &H, boundary: i64) -> ShimResult<Owned<'_, H>> {
    range_native(host, 0, boundary, UNIT_STEP)
}

/// `range(start, end)` over literals.
pub fn range2<H: Host>(host: &H, start: i64, end: i64) -> ShimResult<Owned<'_, H>> {
    range_native(host, start, end, UNIT_STEP)
}

/// Coerce one operand to an integral object.
///
/// Integral operands are returned as they are; anything else goes through
/// its own integer conversion, whose errors propagate untouched.
fn to_range_arg<'h, H: Host>(host: &'h H, value: ObjRef, name: &str) -> ShimResult<Owned<'h, H>> {
    if host.is_integral(value) {
        return Ok(Owned::borrowed(host, value));
    }
    match host.integer_slot(value) {
        Some(converted) => Ok(host.own(converted?)),
        None => Err(ShimError::type_error(format!(
            "range() integer {name} argument expected, got {}.",
            host.type_name_of(value)
        ))),
    }
}

impl<'h, H: Host> Shim<'h, H> {
    /// `range()` over objects coercible to integers.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn range(&self, args: RangeArgs) -> ShimResult<Owned<'h, H>> {
        let host = self.host();
        match args {
            RangeArgs::Stop(boundary) => {
                let boundary = to_range_arg(host, boundary, "start")?;
                match host.as_i64(boundary.get()) {
                    Ok(end) => range1(host, end),
                    Err(_) => self.range_fallback(args.arity(), &[boundary.get()]),
                }
            }
            RangeArgs::StartStop(low, high) => {
                let low = to_range_arg(host, low, "start")?;
                let high = to_range_arg(host, high, "end")?;
                match (host.as_i64(low.get()), host.as_i64(high.get())) {
                    (Ok(start), Ok(end)) => range2(host, start, end),
                    _ => self.range_fallback(args.arity(), &[high.get(), low.get()]),
                }
            }
            RangeArgs::StartStopStep(low, high, step) => {
                let low = to_range_arg(host, low, "start")?;
                let high = to_range_arg(host, high, "end")?;
                let step = to_range_arg(host, step, "step")?;
                match (
                    host.as_i64(low.get()),
                    host.as_i64(high.get()),
                    host.as_i64(step.get()),
                ) {
                    (Ok(start), Ok(end), Ok(step)) => {
                        let step = NonZeroI64::new(step).ok_or_else(|| {
                            ShimError::value("range() step argument must not be zero")
                        })?;
                        range_native(host, start, end, step)
                    }
                    _ => self.range_fallback(
                        args.arity(),
                        &[step.get(), high.get(), low.get()],
                    ),
                }
            }
        }
    }

    fn range_fallback(&self, arity: usize, reversed: &[ObjRef]) -> ShimResult<Owned<'h, H>> {
        tracing::trace!(target: "shimrt::range", arity, "operand exceeds machine range, using host range");
        self.builtins.range.call(self.host(), reversed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shimrt_core::{ExceptionKind, HostError, TypeFlags};
    use shimrt_host::{ClassSpec, NativeFn, ReferenceHost, TypeSlots};

    fn values(host: &ReferenceHost, list: ObjRef) -> Vec<i64> {
        host.sequence_items(list)
            .unwrap()
            .into_iter()
            .map(|item| host.as_i64(item).unwrap())
            .collect()
    }

    fn step(value: i64) -> NonZeroI64 {
        NonZeroI64::new(value).unwrap()
    }

    #[test]
    fn test_native_forward_and_backward() {
        let host = ReferenceHost::new();
        let up = range_native(&host, 0, 10, step(1)).unwrap();
        assert_eq!(values(&host, up.get()), (0..10).collect::<Vec<_>>());

        let down = range_native(&host, 10, 0, step(-1)).unwrap();
        assert_eq!(values(&host, down.get()), (1..=10).rev().collect::<Vec<_>>());

        let empty = range_native(&host, 5, 5, step(1)).unwrap();
        assert!(values(&host, empty.get()).is_empty());

        let wrong_way = range_native(&host, 0, 10, step(-3)).unwrap();
        assert!(values(&host, wrong_way.get()).is_empty());
    }

    #[test]
    fn test_native_stops_at_machine_limit() {
        let host = ReferenceHost::new();
        let list = range_native(&host, i64::MAX - 2, i64::MAX, step(5)).unwrap();
        assert_eq!(values(&host, list.get()), vec![i64::MAX - 2]);

        let list = range_native(&host, i64::MIN + 1, i64::MIN, step(-1)).unwrap();
        assert_eq!(values(&host, list.get()), vec![i64::MIN + 1]);
    }

    #[test]
    fn test_literal_overloads() {
        let host = ReferenceHost::new();
        assert_eq!(values(&host, range1(&host, 3).unwrap().get()), vec![0, 1, 2]);
        assert_eq!(values(&host, range2(&host, -2, 1).unwrap().get()), vec![-2, -1, 0]);
        assert!(values(&host, range1(&host, -4).unwrap().get()).is_empty());
    }

    #[test]
    fn test_object_zero_step_is_value_error() {
        let host = ReferenceHost::new();
        let shim = Shim::new(&host);
        let x = host.own(host.new_int(1).unwrap());
        let y = host.own(host.new_int(9).unwrap());
        let zero = host.own(host.new_int(0).unwrap());
        let err = shim
            .range(RangeArgs::StartStopStep(x.get(), y.get(), zero.get()))
            .unwrap_err();
        assert_eq!(err, ShimError::value("range() step argument must not be zero"));
    }

    #[test]
    fn test_coercion_error_names_parameter() {
        let host = ReferenceHost::new();
        let shim = Shim::new(&host);
        let one = host.own(host.new_int(1).unwrap());
        let text = host.own(host.new_str("10").unwrap());

        let err = shim.range(RangeArgs::Stop(text.get())).unwrap_err();
        assert_eq!(err.message(), "range() integer start argument expected, got str.");

        let err = shim
            .range(RangeArgs::StartStop(one.get(), text.get()))
            .unwrap_err();
        assert_eq!(err.message(), "range() integer end argument expected, got str.");

        let err = shim
            .range(RangeArgs::StartStopStep(one.get(), one.get(), text.get()))
            .unwrap_err();
        assert_eq!(err.message(), "range() integer step argument expected, got str.");
    }

    #[test]
    fn test_floats_are_truncated() {
        let host = ReferenceHost::new();
        let shim = Shim::new(&host);
        let stop = host.own(host.new_float(3.9));
        let list = shim.range(RangeArgs::Stop(stop.get())).unwrap();
        assert_eq!(values(&host, list.get()), vec![0, 1, 2]);
    }

    #[test]
    fn test_conversion_error_propagates_untouched() {
        let host = ReferenceHost::new();
        let shim = Shim::new(&host);
        let class = host.own(host.new_class(
            "Broken",
            ClassSpec {
                flags: TypeFlags::HAVE_CLASS,
                slots: TypeSlots {
                    int: Some(NativeFn::new("__int__", |_, _| {
                        Err(HostError::new(ExceptionKind::Runtime, "no int for you"))
                    })),
                    ..TypeSlots::default()
                },
                ..ClassSpec::default()
            },
        ));
        let broken = host.own(host.new_instance(class.get()));
        let err = shim.range(RangeArgs::Stop(broken.get())).unwrap_err();
        assert_eq!(
            err,
            ShimError::Host(HostError::new(ExceptionKind::Runtime, "no int for you"))
        );
    }
}
