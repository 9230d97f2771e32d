use url::Url;

/// Join an orchestrator base URL with a second segment.
///
/// * A base without a scheme is coerced to `https` on the default port.
/// * A second segment that is already an absolute URL replaces the base.
/// * Otherwise the segment is appended with exactly one `/` between them.
///
/// The result never ends with `/`. Returns `None` when the base is missing or
/// cannot be parsed.
pub fn join_url(base: Option<&str>, second: Option<&str>) -> Option<String> {
    let base = base.map(str::trim).filter(|b| !b.is_empty())?;
    let base = normalize_base(base)?;

    let joined = match second.map(str::trim) {
        None | Some("") => base,
        Some(second) => match absolute(second) {
            Some(url) => url,
            None => {
                let joined = format!(
                    "{}/{}",
                    base.as_str().trim_end_matches('/'),
                    second.trim_start_matches('/')
                );
                Url::parse(&joined).ok()?
            }
        },
    };

    Some(joined.as_str().trim_end_matches('/').to_string())
}

fn normalize_base(base: &str) -> Option<Url> {
    if base.contains("://") {
        return Url::parse(base).ok();
    }
    let mut url = Url::parse(&format!("https://{}", base)).ok()?;
    url.set_port(None).ok()?;
    Some(url)
}

fn absolute(segment: &str) -> Option<Url> {
    Url::parse(segment).ok().filter(|url| !url.cannot_be_a_base())
}
