//! `locshare peers` and `locshare history`: read-back views over the hub's
//! pull API, for checking state from a terminal without a frontend.

use anyhow::{Result, bail};

use locshare_shared::now_millis;

use crate::api::ApiClient;
use crate::config::Configuration;

/// List connected peers with presence and their latest telemetry.
pub async fn show_peers() -> Result<()> {
    let api = client()?;
    let peers = api.connected_users().await?;

    if peers.is_empty() {
        println!("No connected peers.");
        return Ok(());
    }

    for peer in peers {
        let presence = if peer.is_online { "online" } else { "offline" };
        println!("{} (id {}, {})", peer.nickname, peer.user_id, presence);

        match api.latest_location_of(peer.user_id).await? {
            Some(loc) => println!(
                "  location: {:.5}, {:.5} {} ({})",
                loc.latitude,
                loc.longitude,
                loc.address,
                age(loc.timestamp)
            ),
            None => println!("  location: none recorded"),
        }
        match api.latest_battery_of(peer.user_id).await? {
            Some(bat) => println!(
                "  battery: {}%{} ({})",
                bat.battery_level,
                if bat.is_charging { ", charging" } else { "" },
                age(bat.timestamp)
            ),
            None => println!("  battery: none recorded"),
        }
    }

    Ok(())
}

/// Print this user's own telemetry over the last `hours` hours.
pub async fn show_history(hours: u64) -> Result<()> {
    let api = client()?;
    let start = now_millis() - (hours as i64) * 60 * 60 * 1000;

    match api.latest_location().await? {
        Some(loc) => println!(
            "Current location: {:.5}, {:.5} {} ({})",
            loc.latitude,
            loc.longitude,
            loc.address,
            age(loc.timestamp)
        ),
        None => println!("Current location: none recorded"),
    }
    match api.latest_battery().await? {
        Some(bat) => println!(
            "Current battery: {}%{} ({})",
            bat.battery_level,
            if bat.is_charging { ", charging" } else { "" },
            age(bat.timestamp)
        ),
        None => println!("Current battery: none recorded"),
    }

    let locations = api.location_history(Some(start), None).await?;
    println!("\nLocations (last {hours}h): {}", locations.len());
    for loc in &locations {
        println!(
            "  {} {:.5}, {:.5} {}",
            age(loc.timestamp),
            loc.latitude,
            loc.longitude,
            loc.address
        );
    }

    let batteries = api.battery_history(Some(start), None).await?;
    println!("\nBattery readings (last {hours}h): {}", batteries.len());
    for bat in &batteries {
        println!(
            "  {} {}%{}",
            age(bat.timestamp),
            bat.battery_level,
            if bat.is_charging { " charging" } else { "" }
        );
    }

    Ok(())
}

fn client() -> Result<ApiClient> {
    let mut config = Configuration::create()?;
    config.load_with_settings()?;
    if config.auth_token.is_empty() {
        bail!("no auth token configured; run `locshare auth login` or set LOCSHARE_TOKEN");
    }
    ApiClient::new(&config.hub_url, &config.auth_token)
}

/// Human-readable age of an epoch-millis timestamp.
fn age(timestamp: i64) -> String {
    let delta_secs = (now_millis() - timestamp).max(0) / 1000;
    match delta_secs {
        0..60 => format!("{delta_secs}s ago"),
        60..3600 => format!("{}m ago", delta_secs / 60),
        3600..86400 => format!("{}h ago", delta_secs / 3600),
        _ => format!("{}d ago", delta_secs / 86400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_buckets() {
        let now = now_millis();
        assert!(age(now).ends_with("s ago"));
        assert_eq!(age(now - 5 * 60 * 1000), "5m ago");
        assert_eq!(age(now - 3 * 3600 * 1000), "3h ago");
        assert_eq!(age(now - 2 * 86400 * 1000), "2d ago");
    }
}
