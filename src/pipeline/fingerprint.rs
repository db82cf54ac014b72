//! Scanners report the same issue under cosmetically different URLs
//! (`http` vs `https`, with or without `www.`). Findings are deduplicated on a
//! canonical form with both stripped.

/// Strips a leading `http://`/`https://` and then a leading `www.`.
pub fn canonical_fingerprint(fingerprint: &str) -> &str {
	let without_scheme = fingerprint
		.strip_prefix("https://")
		.or_else(|| fingerprint.strip_prefix("http://"))
		.unwrap_or(fingerprint);

	without_scheme.strip_prefix("www.").unwrap_or(without_scheme)
}
