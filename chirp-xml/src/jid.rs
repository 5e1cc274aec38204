/// Strip the resource suffix from an address, leaving the bare
/// identifier that names the account rather than one connected session.
pub fn bare(jid: &str) -> &str {
    match jid.split_once('/') {
        Some((bare, _)) => bare,
        None => jid,
    }
}

/// The domain part of an address, without node or resource.
pub fn domain(jid: &str) -> &str {
    let bare = bare(jid);
    match bare.split_once('@') {
        Some((_, domain)) => domain,
        None => bare,
    }
}
