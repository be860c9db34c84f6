/// Compiles the given regex literal at most once and returns a
/// `&'static regex_lite::Regex`.
///
/// An invalid literal is a bug, so this panics on one.
macro_rules! regex {
    ($re:literal $(,)?) => {{
        static RE: std::sync::OnceLock<regex_lite::Regex> =
            std::sync::OnceLock::new();
        RE.get_or_init(|| {
            regex_lite::Regex::new($re).expect("regex literal is valid")
        })
    }};
}
