//! `print` statement support with softspace tracking.
//!
//! Each stream carries a softspace flag meaning "a separating space is owed
//! before the next item". Items ending in a tab leave the flag cleared.

use shimrt_core::{Host, ObjRef, Owned};

use crate::error::{ShimError, ShimResult};

/// The current `sys.stdout` (borrowed).
///
/// # Errors
///
/// [`ShimError::Runtime`] when `sys.stdout` has been removed.
pub fn get_stdout<H: Host>(host: &H) -> ShimResult<ObjRef> {
    host.sys_object("stdout")
        .ok_or_else(|| ShimError::Runtime("lost sys.stdout".to_string()))
}

/// Print one item to `file`, emitting the owed space first.
pub fn print_item_to<H: Host>(host: &H, file: ObjRef, object: ObjRef) -> ShimResult<()> {
    // The stream must outlive any attribute hook run while printing.
    let file = Owned::borrowed(host, file);

    let (print, ends_with_tab) = match host.to_str(object) {
        Ok(text) => {
            let text = host.own(text);
            let ends_with_tab = host
                .text_contents(text.get())
                .is_some_and(|text| text.ends_with('\t'));
            (text, ends_with_tab)
        }
        Err(err) => {
            tracing::debug!(target: "shimrt::print", error = %err, "str() failed, printing raw object");
            (Owned::borrowed(host, object), false)
        }
    };

    if host.soft_space(file.get(), !ends_with_tab) {
        host.write_str(file.get(), " ")?;
    }
    host.write_object(file.get(), print.get(), true)?;
    if ends_with_tab {
        host.soft_space(file.get(), false);
    }
    Ok(())
}

/// Print one item to `sys.stdout`.
pub fn print_item<H: Host>(host: &H, object: ObjRef) -> ShimResult<()> {
    print_item_to(host, get_stdout(host)?, object)
}

/// End the line on `file` and clear its softspace.
pub fn print_new_line_to<H: Host>(host: &H, file: ObjRef) -> ShimResult<()> {
    host.write_str(file, "\n")?;
    host.soft_space(file, false);
    Ok(())
}

pub fn print_new_line<H: Host>(host: &H) -> ShimResult<()> {
    print_new_line_to(host, get_stdout(host)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shimrt_core::ExceptionKind;
    use shimrt_host::ReferenceHost;

    #[test]
    fn test_items_are_space_separated() {
        let host = ReferenceHost::new();
        let a = host.own(host.new_str("a").unwrap());
        let one = host.own(host.new_int(1).unwrap());

        print_item(&host, a.get()).unwrap();
        print_item(&host, one.get()).unwrap();
        print_new_line(&host).unwrap();
        print_item(&host, a.get()).unwrap();
        print_new_line(&host).unwrap();
        assert_eq!(host.stdout_text(), "a 1\na\n");
    }

    #[test]
    fn test_trailing_tab_owes_no_space() {
        let host = ReferenceHost::new();
        let tabbed = host.own(host.new_str("x\t").unwrap());
        let y = host.own(host.new_str("y").unwrap());

        print_item(&host, tabbed.get()).unwrap();
        print_item(&host, y.get()).unwrap();
        assert_eq!(host.stdout_text(), "x\ty");

        let stdout = get_stdout(&host).unwrap();
        assert!(host.soft_space(stdout, true));
    }

    #[test]
    fn test_failed_str_writes_raw_object() {
        let host = ReferenceHost::new();
        let file = host.own(host.new_file("<buffer>", "w"));
        let text = host.own(host.new_unicode("caf\u{e9}"));
        let word = host.own(host.new_str("menu").unwrap());

        print_item_to(&host, file.get(), word.get()).unwrap();
        print_item_to(&host, file.get(), text.get()).unwrap();
        print_new_line_to(&host, file.get()).unwrap();
        assert_eq!(host.file_contents(file.get()).as_deref(), Some("menu caf\u{e9}\n"));
    }

    #[test]
    fn test_lost_stdout() {
        let host = ReferenceHost::new();
        host.set_sys_object("stdout", None).unwrap();
        assert_eq!(
            print_new_line(&host).unwrap_err(),
            ShimError::Runtime("lost sys.stdout".to_string())
        );
    }

    #[test]
    fn test_write_error_propagates() {
        let host = ReferenceHost::new();
        let file = host.own(host.new_file("input.txt", "r"));
        let a = host.own(host.new_str("a").unwrap());

        let baseline = host.live_objects();
        let err = print_item_to(&host, file.get(), a.get()).unwrap_err();
        assert_eq!(err.kind(), ExceptionKind::Io);
        assert_eq!(host.live_objects(), baseline);
    }
}
