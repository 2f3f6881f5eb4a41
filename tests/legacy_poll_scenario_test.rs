use alphaess_bridge::config::Config;
use alphaess_bridge::driver::BridgeDriver;
use alphaess_bridge::vendor::build_client;
use chrono::{DateTime, Duration, TimeZone, Utc};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 3, 12, 0, 0).unwrap()
}

fn legacy_config(server: &ServerGuard) -> Config {
    let mut config = Config::default();
    config.device.serial = "AL001".into();
    config.credentials.username = "user".into();
    config.credentials.password = "secret".into();
    config.api.base_url = Some(server.url());
    config.stdout_sink = false;
    config.web.enabled = false;
    config
}

async fn mock_login(server: &mut ServerGuard) -> mockito::Mock {
    server
        .mock("POST", "/Account/Login")
        .match_body(Matcher::Json(json!({"username": "user", "password": "secret"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "code": 200,
                "info": "Success",
                "data": {"AccessToken": "tok", "ExpiresIn": 7200, "RefreshTokenKey": "rk"}
            })
            .to_string(),
        )
        .create_async()
        .await
}

fn realtime_body() -> String {
    json!({
        "code": 200,
        "info": "Success",
        "data": {
            "ppv1": 100, "ppv2": 0, "ppv3": 0, "ppv4": 0,
            "pmeter_l1": 20, "pmeter_l2": 0, "pmeter_l3": 0,
            "pbat": -10, "soc": 80
        }
    })
    .to_string()
}

async fn mock_statistics(
    server: &mut ServerGuard,
    by: &str,
    data: serde_json::Value,
) -> mockito::Mock {
    server
        .mock("POST", "/Statistic/SystemStatistic")
        .match_header("authorization", "Bearer tok")
        .match_body(Matcher::PartialJson(json!({"statisticBy": by, "sn": "AL001"})))
        .with_status(200)
        .with_body(json!({"code": 200, "info": "Success", "data": data}).to_string())
        .create_async()
        .await
}

#[tokio::test]
async fn first_document_after_statistics_warm_up() {
    let mut server = Server::new_async().await;
    let login = mock_login(&mut server).await;
    let realtime = server
        .mock("GET", "/ESS/GetSecondDataBySn")
        .match_header("authorization", "Bearer tok")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("sys_sn".into(), "AL001".into()),
            Matcher::UrlEncoded("noLoading".into(), "true".into()),
        ]))
        .with_status(200)
        .with_body(realtime_body())
        .expect(2)
        .create_async()
        .await;
    let hourly = mock_statistics(&mut server, "day", json!([])).await;
    let daily = mock_statistics(&mut server, "month", json!({"Eloads": [1.0, 2.0, 15.0]})).await;
    let monthly = mock_statistics(&mut server, "year", json!([])).await;
    let yearly = mock_statistics(&mut server, "total", json!([])).await;

    let config = legacy_config(&server);
    let client = build_client(&config).unwrap();
    let (mut driver, handle) = BridgeDriver::new(config, client, Vec::new());

    // caches are cold on the first tick
    assert!(driver.tick(t0()).await.is_none());
    assert!(handle.latest_document().is_none());
    driver.wait_for_refreshes().await;
    assert!(driver.caches().all_warm());

    let doc = driver
        .tick(t0() + Duration::seconds(60))
        .await
        .expect("document on second tick");
    assert_eq!(doc.code, 200);
    assert_eq!(doc.payload.consumption, 110.0);
    assert_eq!(doc.payload.grid, 20.0);
    assert_eq!(doc.payload.modules, 100.0);
    assert_eq!(doc.payload.battery.soc, 80.0);
    assert_eq!(doc.payload.battery.load, -10.0);
    assert_eq!(doc.payload.today.consumption, 15.0);
    assert_eq!(doc.payload.rawdata.realtime["ppv1"], 100);
    assert_eq!(
        doc.payload.rawdata.statistics["daily"],
        json!({"Eloads": [1.0, 2.0, 15.0]})
    );
    assert_eq!(handle.latest_document().unwrap().payload.grid, 20.0);

    login.assert_async().await;
    realtime.assert_async().await;
    hourly.assert_async().await;
    daily.assert_async().await;
    monthly.assert_async().await;
    yearly.assert_async().await;
}

#[tokio::test]
async fn empty_primary_payload_switches_to_backup_for_good() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;
    let primary = server
        .mock("GET", "/ESS/GetSecondDataBySn")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"code": 200, "info": "Success", "data": null}).to_string())
        .expect(1)
        .create_async()
        .await;
    let backup = server
        .mock("GET", "/ESS/GetLastPowerDataBySN")
        .match_query(Matcher::UrlEncoded("sys_sn".into(), "AL001".into()))
        .with_status(200)
        .with_body(realtime_body())
        .expect(2)
        .create_async()
        .await;

    let mut config = legacy_config(&server);
    config.api.backup_realtime = true;
    config.statistics.hourly_minutes = None;
    config.statistics.daily_minutes = None;
    config.statistics.monthly_minutes = None;
    config.statistics.yearly_minutes = None;
    let client = build_client(&config).unwrap();
    let (mut driver, _handle) = BridgeDriver::new(config, client, Vec::new());

    // the tick that saw the empty payload emits nothing
    assert!(driver.tick(t0()).await.is_none());
    let doc = driver.tick(t0() + Duration::seconds(60)).await.unwrap();
    assert_eq!(doc.payload.consumption, 110.0);
    assert!(driver.tick(t0() + Duration::seconds(120)).await.is_some());

    primary.assert_async().await;
    backup.assert_async().await;
}

#[tokio::test]
async fn expired_refresh_key_falls_back_to_login() {
    let mut server = Server::new_async().await;
    let login = server
        .mock("POST", "/Account/Login")
        .with_status(200)
        .with_body(
            json!({
                "code": 200,
                "data": {"AccessToken": "tok", "ExpiresIn": 100, "RefreshTokenKey": "rk"}
            })
            .to_string(),
        )
        .expect(2)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/Account/RefreshToken")
        .match_body(Matcher::PartialJson(json!({"refreshTokenKey": "rk"})))
        .with_status(200)
        .with_body(json!({"code": 401, "info": "refresh token expired"}).to_string())
        .expect(1)
        .create_async()
        .await;
    let _realtime = server
        .mock("GET", "/ESS/GetSecondDataBySn")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(realtime_body())
        .create_async()
        .await;

    let mut config = legacy_config(&server);
    config.statistics.hourly_minutes = None;
    config.statistics.daily_minutes = None;
    config.statistics.monthly_minutes = None;
    config.statistics.yearly_minutes = None;
    let client = build_client(&config).unwrap();
    let (mut driver, _handle) = BridgeDriver::new(config, client, Vec::new());

    assert!(driver.tick(t0()).await.is_some());
    // lifetime 100s is below the margin, so the token is renewed at 50s
    assert!(driver.tick(t0() + Duration::seconds(60)).await.is_some());

    login.assert_async().await;
    refresh.assert_async().await;
}
