//! ---
//! chroma_section: "03-persistence-logging"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Context-enriched logging helpers."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
/// Emit an informational log enriched with stream or parameter context.
#[macro_export]
macro_rules! chroma_info {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::INFO,
            topic = ctx.topic.unwrap_or(""),
            key = ctx.key.unwrap_or(""),
            url = ctx.url.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        tracing::event!(
            tracing::Level::INFO,
            topic = ctx.topic.unwrap_or(""),
            key = ctx.key.unwrap_or(""),
            url = ctx.url.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit a debug log enriched with stream or parameter context.
#[macro_export]
macro_rules! chroma_debug {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::DEBUG,
            topic = ctx.topic.unwrap_or(""),
            key = ctx.key.unwrap_or(""),
            url = ctx.url.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        tracing::event!(
            tracing::Level::DEBUG,
            topic = ctx.topic.unwrap_or(""),
            key = ctx.key.unwrap_or(""),
            url = ctx.url.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit a warning enriched with stream or parameter context.
#[macro_export]
macro_rules! chroma_warn {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::WARN,
            topic = ctx.topic.unwrap_or(""),
            key = ctx.key.unwrap_or(""),
            url = ctx.url.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        tracing::event!(
            tracing::Level::WARN,
            topic = ctx.topic.unwrap_or(""),
            key = ctx.key.unwrap_or(""),
            url = ctx.url.unwrap_or(""),
            attempt = ctx.attempt.unwrap_or_default(),
            message = %format_args!($($arg)+)
        );
    }};
}
