#[cfg(test)]
mod test_end_to_end;
#[cfg(test)]
mod test_resilience;
#[cfg(test)]
mod test_snapshot_reports;
