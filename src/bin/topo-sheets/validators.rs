use topo_sheets::sheet_id::Series;

pub fn is_numeric_min(min: usize) -> impl Fn(String) -> Result<(), String> {
    move |v: String| {
        let val = v
            .parse::<usize>()
            .map_err(|_| "must be numeric".to_owned())?;

        if val < min {
            return Err(format!("must be >= {}", min));
        }

        Ok(())
    }
}

pub fn is_zoom(v: String) -> Result<(), String> {
    let val = v.parse::<u8>().map_err(|_| "must be numeric".to_owned())?;

    if val > 24 {
        return Err("must be <= 24".to_owned());
    }

    Ok(())
}

pub fn is_thread_count(v: String) -> Result<(), String> {
    if v == "ALL_CPUS" {
        return Ok(());
    }
    is_numeric_min(1)(v).map_err(|e| format!("{} or ALL_CPUS", e))
}

pub fn is_series(v: String) -> Result<(), String> {
    v.parse::<Series>().map(|_| ()).map_err(str::to_owned)
}
