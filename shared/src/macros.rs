//! Console output. On the real machine this goes to the serial port; hosted
//! builds (tests) fall back to stdout.

use core::fmt;

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    #[cfg(target_os = "none")]
    {
        use core::fmt::Write;
        // SAFETY: Single core, so nothing else can be mid-write.
        #[allow(static_mut_refs)]
        unsafe {
            let _ = crate::serial::SERIAL_WRITER.write_fmt(args);
        }
    }
    #[cfg(not(target_os = "none"))]
    {
        std::print!("{args}");
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::macros::_print(core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n")
    };
    ($($arg:tt)*) => {{
        $crate::macros::_print(core::format_args!($($arg)*));
        $crate::print!("\n");
    }};
}
