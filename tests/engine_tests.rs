#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use fee_engine::controller::ControllerState;
    use fee_engine::node::{JsonFileNode, MemoryNode};
    use fee_engine::rate_limit::RejectReason;
    use fee_engine::snapshot::{ChannelPolicy, ChannelSnapshot, LiquiditySnapshot, PolicyUpdate};
    use fee_engine::store::{EngineState, JsonFileStore, MemoryStore, StateStore};
    use fee_engine::{ChannelId, EngineConfig, EngineError, FeeEngine, PeerId};

    // ========== Fixtures ==========

    const HEIGHT: u32 = 850_000;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
    }

    fn days(d: i64) -> DateTime<Utc> {
        t0() + Duration::days(d)
    }

    fn channel(id: u64, peer: &str, local: u64, remote: u64, rate: i64) -> ChannelSnapshot {
        ChannelSnapshot {
            channel_id: ChannelId(id),
            peer: PeerId::from(peer),
            private: false,
            opening_height: 800_000,
            capacity_sat: local + remote,
            local_balance_sat: local,
            remote_balance_sat: remote,
            policy: Some(ChannelPolicy {
                fee_rate_ppm: rate,
                base_fee_msat: 1_000,
                inbound_fee_rate_ppm: 0,
                inbound_base_fee_msat: 0,
                last_update: t0() - Duration::days(2),
            }),
        }
    }

    /// Two peers; the default target works out to 35% remote.
    /// 02aa sits above it (error ≈ +0.115), 03bb below (error ≈ -0.214).
    fn snapshot() -> LiquiditySnapshot {
        LiquiditySnapshot {
            timestamp: t0(),
            block_height: HEIGHT,
            channels: vec![
                channel(1, "02aa", 500_000, 500_000, 100),
                channel(2, "03bb", 800_000, 200_000, 300),
            ],
        }
    }

    fn config(engine: &str, group: &str, tables: &str) -> EngineConfig {
        let engine = if engine.contains("db_only") {
            engine.to_string()
        } else {
            format!("db_only = false\n{engine}")
        };
        let toml = format!(
            r#"
[engine]
{engine}

[margin]
k_m = 50.0
alpha = 0.5

[named_ewma.standard]
k_p = 40.0
k_i = 80.0
alpha_i = 0.1

[named_ewma.fast]
k_p = 1000.0

[peers.default]
{group}

{tables}
"#
        );
        EngineConfig::from_toml_str(&toml).unwrap()
    }

    fn standard() -> EngineConfig {
        config("", r#"ewma = "standard""#, "")
    }

    fn fast() -> EngineConfig {
        config("", r#"ewma = "fast""#, "")
    }

    fn engine(cfg: EngineConfig, snap: LiquiditySnapshot) -> FeeEngine<MemoryNode, MemoryStore> {
        FeeEngine::new(cfg, MemoryNode::new(snap), MemoryStore::default())
    }

    fn peer(id: &str) -> PeerId {
        PeerId::from(id)
    }

    fn move_to(engine: &mut FeeEngine<MemoryNode, MemoryStore>, at: DateTime<Utc>) {
        engine.node_mut().advance_to(at, HEIGHT);
    }

    // ========== Calibration ==========

    #[test]
    fn first_tick_calibrates_to_current_rates() {
        let mut e = engine(standard(), snapshot());
        let report = e.tick().unwrap();

        assert_eq!(report.margin, 50.0);
        let a = report.peer(&peer("02aa")).unwrap();
        let b = report.peer(&peer("03bb")).unwrap();
        assert!(a.recalibrated && b.recalibrated);
        assert!((a.target - 350_000.0).abs() < 1e-6);
        assert_eq!(a.spread, 50.0);
        assert_eq!(b.spread, 250.0);
        assert_eq!(a.outbound, 100.0);
        assert_eq!(b.outbound, 300.0);
        assert_eq!(a.inbound, -50.0);

        // Recalibrated rates equal the observed ones: nothing to send.
        assert!(report.updates.is_empty());
        assert_eq!(report.rejected.len(), 2);
        assert!(report.rejected.iter().all(|r| r.outbound == Some(RejectReason::Unchanged)));
        assert!(e.node().broadcasts.is_empty());
        assert_eq!(e.store().saves, 1);
        assert_eq!(e.store().state.peers.len(), 2);
        assert_eq!(e.store().state.last_tick, Some(t0()));
    }

    #[test]
    fn same_timestamp_tick_is_idempotent() {
        let mut e = engine(standard(), snapshot());
        e.tick().unwrap();
        let saved = e.store().state.clone();

        let report = e.tick().unwrap();
        assert!(report.peers.iter().all(|p| !p.recalibrated));
        assert!(report.peers.iter().all(|p| p.gains.total() == 0.0));
        assert!(report.updates.is_empty());
        assert_eq!(e.store().state, saved);
    }

    #[test]
    fn reference_rate_change_recalibrates() {
        let mut e = engine(standard(), snapshot());
        e.tick().unwrap();

        // The operator sets 02aa's rate by hand.
        move_to(&mut e, days(1));
        if let Some(p) = e.node_mut().state.channels[0].policy.as_mut() {
            p.fee_rate_ppm = 180;
        }
        let report = e.tick().unwrap();
        let a = report.peer(&peer("02aa")).unwrap();
        let b = report.peer(&peer("03bb")).unwrap();
        assert!(a.recalibrated && a.forced);
        assert!(!b.recalibrated);
        // Recalibrated to 180 - 50, then advanced one day.
        assert!((a.spread - 130.0 - a.gains.total()).abs() < 1e-9);
        assert!(a.gains.dt == 1.0);
    }

    // ========== Rate limiting ==========

    #[test]
    fn small_steps_rejected_threshold_step_applied() {
        let mut e = engine(standard(), snapshot());
        e.tick().unwrap();
        move_to(&mut e, days(1));
        let report = e.tick().unwrap();

        // 02aa: 100 -> 105.06, truncated to 105.
        let rejected = report.rejected.iter().find(|r| r.channel_id == ChannelId(1)).unwrap();
        assert_eq!(rejected.outbound, Some(RejectReason::StepTooSmall { change: 5, required: 10 }));

        // 03bb: 300 -> 290.6, truncated to 290; a change of exactly 10 passes.
        assert_eq!(report.updates.len(), 1);
        let update = &report.updates[0];
        assert_eq!(update.channel_id, ChannelId(2));
        assert_eq!(update.fee_rate_ppm, 290);
        assert_eq!(update.base_fee_msat, 1_000);
        assert_eq!(report.broadcast, 1);

        let policy = e.node().state.channels[1].policy.unwrap();
        assert_eq!(policy.fee_rate_ppm, 290);
        assert_eq!(policy.last_update, days(1));
        assert_eq!(e.store().state.policies[&ChannelId(2)].fee_rate_ppm, 290);
    }

    #[test]
    fn changes_wait_for_min_seconds() {
        let cfg = config("", "ewma = \"fast\"\nmin_seconds = 864000", "");
        let mut e = engine(cfg, snapshot());
        e.tick().unwrap();
        move_to(&mut e, days(1));
        let report = e.tick().unwrap();

        assert!(report.updates.is_empty());
        assert_eq!(report.rejected.len(), 2);
        for r in &report.rejected {
            assert_eq!(
                r.outbound,
                Some(RejectReason::TooSoon { elapsed_seconds: 3 * 86_400, required: 864_000 })
            );
            assert_eq!(r.inbound, None);
        }
    }

    #[test]
    fn inbound_rates_follow_spread_when_enabled() {
        let cfg = config("set_inbound = true", r#"ewma = "fast""#, "");
        let mut e = engine(cfg, snapshot());
        let report = e.tick().unwrap();
        // Forced on the calibration tick: inbound moves to -spread.
        let u1 = report.updates.iter().find(|u| u.channel_id == ChannelId(1)).unwrap();
        assert_eq!(u1.fee_rate_ppm, 100);
        assert_eq!(u1.inbound_fee_rate_ppm, -50);
        let u2 = report.updates.iter().find(|u| u.channel_id == ChannelId(2)).unwrap();
        assert_eq!(u2.inbound_fee_rate_ppm, -250);
    }

    // ========== New channels ==========

    #[test]
    fn new_channel_gets_forced_rate() {
        let mut snap = snapshot();
        let mut fresh = channel(3, "04cc", 1_000_000, 0, 1);
        fresh.opening_height = HEIGHT - 10;
        if let Some(p) = fresh.policy.as_mut() {
            p.last_update = t0();
        }
        snap.channels.push(fresh);

        let mut e = engine(standard(), snap);
        let report = e.tick().unwrap();
        let c = report.peer(&peer("04cc")).unwrap();
        assert!(c.forced);
        // New-channel rate 21000 with local majority, capped at fee_rate_max.
        assert_eq!(c.spread, 21_000.0 - 50.0);
        assert_eq!(c.outbound, 2_500.0);
        let update = report.updates.iter().find(|u| u.channel_id == ChannelId(3)).unwrap();
        assert_eq!(update.fee_rate_ppm, 2_500);

        // Once a policy is on record the channel is no longer new.
        move_to(&mut e, t0() + Duration::hours(1));
        let report = e.tick().unwrap();
        let c = report.peer(&peer("04cc")).unwrap();
        assert!(!c.forced && !c.recalibrated);
    }

    // ========== Broadcast gating ==========

    #[test]
    fn db_only_computes_without_broadcast() {
        let cfg = config("db_only = true\nno_db_only_peers = [\"03bb\"]", r#"ewma = "fast""#, "");
        let mut e = engine(cfg, snapshot());
        e.tick().unwrap();
        move_to(&mut e, days(1));
        let report = e.tick().unwrap();

        // 02aa: 100 + 115.4 -> 215; 03bb: 300 - 214.3 -> 85.
        assert_eq!(report.updates.len(), 2);
        let rates: Vec<(ChannelId, i64)> =
            report.updates.iter().map(|u| (u.channel_id, u.fee_rate_ppm)).collect();
        assert!(rates.contains(&(ChannelId(1), 215)));
        assert!(rates.contains(&(ChannelId(2), 85)));

        assert_eq!(report.broadcast, 1);
        assert_eq!(e.node().broadcasts.len(), 1);
        assert_eq!(e.node().broadcasts[0].peer, peer("03bb"));
        assert_eq!(e.node().state.channels[0].policy.unwrap().fee_rate_ppm, 100);

        let policies = &e.store().state.policies;
        assert_eq!(policies[&ChannelId(1)].fee_rate_ppm, 100);
        assert_eq!(policies[&ChannelId(2)].fee_rate_ppm, 85);
    }

    // ========== Failures ==========

    #[test]
    fn clock_regression_aborts_without_saving() {
        let mut e = engine(standard(), snapshot());
        move_to(&mut e, days(1));
        e.tick().unwrap();
        let saved = e.store().state.clone();

        move_to(&mut e, t0());
        let err = e.tick().unwrap_err();
        assert!(matches!(err, EngineError::NonMonotonicTime { .. }), "{err}");
        assert_eq!(e.store().saves, 1);
        assert_eq!(e.store().state, saved);
        assert!(e.node().broadcasts.is_empty());
    }

    #[test]
    fn peer_with_future_state_is_skipped() {
        let future = ControllerState::fresh(days(2), 0.0, 75.0);
        let mut store = MemoryStore::default();
        store.state.peers.insert(peer("02aa"), future);

        let mut e = FeeEngine::new(standard(), MemoryNode::new(snapshot()), store);
        let report = e.tick().unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].peer, peer("02aa"));
        assert!(report.peer(&peer("02aa")).is_none());
        assert!(report.peer(&peer("03bb")).is_some());
        assert_eq!(e.store().state.peers[&peer("02aa")], future);
    }

    #[test]
    fn empty_channels_use_neutral_error() {
        let mut snap = snapshot();
        snap.channels.push(channel(4, "05dd", 0, 0, 100));
        let mut e = engine(standard(), snap);
        let report = e.tick().unwrap();
        let d = report.peer(&peer("05dd")).unwrap();
        assert_eq!(d.error, 0.0);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn excluded_and_private_channels_untouched() {
        let mut snap = snapshot();
        let mut private = channel(5, "02aa", 100_000, 100_000, 100);
        private.private = true;
        snap.channels.push(private);
        snap.channels.push(channel(6, "06ee", 500_000, 500_000, 40));

        let cfg = config("exclude_peers = [\"06ee\"]", r#"ewma = "fast""#, "");
        let mut e = engine(cfg, snap);
        e.tick().unwrap();
        move_to(&mut e, days(1));
        let report = e.tick().unwrap();

        assert!(report.peer(&peer("06ee")).is_none());
        assert!(report.updates.iter().all(|u| u.channel_id != ChannelId(5)));
        assert!(report.updates.iter().all(|u| u.channel_id != ChannelId(6)));
        assert!(report.updates.iter().any(|u| u.channel_id == ChannelId(1)));
    }

    // ========== Pin and spread level ==========

    #[test]
    fn pin_holds_peer_at_fee_rate() {
        let cfg = config(
            "",
            r#"ewma = "standard""#,
            "[pin]\npeer = \"02aa\"\nmethod = \"fee_rate\"\nvalue = 400.0",
        );
        let mut e = engine(cfg, snapshot());
        let report = e.tick().unwrap();

        let pin = report.pin.clone().unwrap();
        assert_eq!(pin.peer, peer("02aa"));
        assert_eq!(pin.shift, 300.0);
        assert_eq!(report.peer(&peer("02aa")).unwrap().outbound, 400.0);
        assert_eq!(report.peer(&peer("03bb")).unwrap().outbound, 600.0);
        // The controller spread itself is not moved by the pin.
        assert_eq!(e.store().state.peers[&peer("02aa")].spread, 50.0);

        // Later ticks keep the pinned peer at the pinned rate.
        move_to(&mut e, days(1));
        let report = e.tick().unwrap();
        let a = report.peer(&peer("02aa")).unwrap();
        assert!((a.outbound - 400.0).abs() < 1e-9);
    }

    #[test]
    fn manual_change_under_pin_is_kept() {
        let cfg = config(
            "",
            "",
            "[pin]\npeer = \"02aa\"\nmethod = \"spread\"\nvalue = 0.0",
        );
        let mut e = engine(cfg, snapshot());
        let report = e.tick().unwrap();
        assert_eq!(report.pin.as_ref().unwrap().shift, -50.0);
        assert_eq!(report.peer(&peer("03bb")).unwrap().outbound, 250.0);
        assert_eq!(e.store().state.pin_shift, -50.0);

        // The operator sets 03bb's rate by hand while the shift holds.
        move_to(&mut e, days(1));
        if let Some(p) = e.node_mut().state.channels[1].policy.as_mut() {
            p.fee_rate_ppm = 400;
        }
        let report = e.tick().unwrap();
        let b = report.peer(&peer("03bb")).unwrap();
        assert!(b.recalibrated && b.forced);
        assert_eq!(b.spread, 400.0);
        assert_eq!(b.outbound, 400.0);
        assert!(report.updates.iter().all(|u| u.channel_id != ChannelId(2)));
        assert_eq!(e.node().state.channels[1].policy.unwrap().fee_rate_ppm, 400);
    }

    #[test]
    fn dynamic_pin_follows_lowest_spread() {
        let cfg = config(
            "",
            r#"ewma = "standard""#,
            "[pin]\npeer = \"dynamic\"\nmethod = \"spread\"\nvalue = 0.0",
        );
        let mut e = engine(cfg, snapshot());
        let report = e.tick().unwrap();
        let pin = report.pin.as_ref().unwrap();
        assert_eq!(pin.peer, peer("02aa"));
        assert_eq!(pin.shift, -50.0);
        assert_eq!(report.peer(&peer("02aa")).unwrap().effective_spread, 0.0);
    }

    #[test]
    fn missing_pin_peer_runs_without_shift() {
        let cfg = config(
            "",
            r#"ewma = "standard""#,
            "[pin]\npeer = \"09zz\"\nmethod = \"spread\"\nvalue = 0.0",
        );
        let mut e = engine(cfg, snapshot());
        let report = e.tick().unwrap();
        assert!(report.pin.is_none());
        assert!(report.pin_error.as_deref().unwrap().contains("09zz"));
        assert_eq!(report.peer(&peer("02aa")).unwrap().outbound, 100.0);
    }

    #[test]
    fn spread_level_moves_all_peers() {
        let cfg = config(
            "",
            r#"ewma = "standard""#,
            "[spread_level]\nmax_deviation_ppm = 100.0\ntarget_ppm = 0.0\nk_p = 10.0",
        );
        let mut e = engine(cfg, snapshot());
        let report = e.tick().unwrap();
        assert_eq!(report.spread_level, Some(0.0));

        // Liquidity-weighted spread sits below the capacity-weighted one, so
        // the level falls.
        move_to(&mut e, days(1));
        let report = e.tick().unwrap();
        let level = report.spread_level.unwrap();
        assert!(level < -1.0 && level > -3.0, "{level}");
        for p in &report.peers {
            assert!((p.effective_spread - (p.spread + level)).abs() < 1e-9);
        }
        assert_eq!(e.store().state.spread_level.map(|s| s.spread), Some(level));
    }

    // ========== Persistence ==========

    #[test]
    fn absent_peer_archived_then_resumed() {
        let cfg = config("max_age_spread_hours = 48", r#"ewma = "standard""#, "");
        let mut e = engine(cfg, snapshot());
        e.tick().unwrap();

        let gone = e.node_mut().state.channels.remove(1);
        move_to(&mut e, days(1));
        e.tick().unwrap();
        assert!(e.store().state.archived.contains_key(&peer("03bb")));
        assert!(!e.store().state.peers.contains_key(&peer("03bb")));

        e.node_mut().state.channels.push(gone);
        move_to(&mut e, days(2));
        let report = e.tick().unwrap();
        let b = report.peer(&peer("03bb")).unwrap();
        assert_eq!(b.gains.dt, 2.0);
        // Continues from the archived spread of 250.
        assert!(!b.recalibrated && !b.forced);
        assert!((b.spread - 250.0 - b.gains.total()).abs() < 1e-9);
        assert!(e.store().state.archived.is_empty());
    }

    #[test]
    fn stale_archive_starts_fresh() {
        let cfg = config("max_age_spread_hours = 24", r#"ewma = "standard""#, "");
        let mut e = engine(cfg, snapshot());
        e.tick().unwrap();

        let gone = e.node_mut().state.channels.remove(1);
        move_to(&mut e, days(1));
        e.tick().unwrap();

        e.node_mut().state.channels.push(gone);
        move_to(&mut e, days(2));
        let report = e.tick().unwrap();
        let b = report.peer(&peer("03bb")).unwrap();
        assert!(b.recalibrated);
        assert_eq!(b.gains.dt, 0.0);
        assert_eq!(b.spread, 250.0);
    }

    #[test]
    fn json_file_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut first = FeeEngine::new(standard(), MemoryNode::new(snapshot()), JsonFileStore::new(&path));
        first.tick().unwrap();
        assert!(path.exists());

        let mut node = MemoryNode::new(snapshot());
        node.advance_to(days(1), HEIGHT);
        let mut second = FeeEngine::new(standard(), node, JsonFileStore::new(&path));
        let report = second.tick().unwrap();
        let a = report.peer(&peer("02aa")).unwrap();
        assert!(!a.recalibrated);
        assert_eq!(a.gains.dt, 1.0);

        let state: EngineState = JsonFileStore::new(&path).load().unwrap();
        assert_eq!(state.last_tick, Some(days(1)));
        assert_eq!(state.policies[&ChannelId(2)].fee_rate_ppm, 290);
    }

    #[test]
    fn json_file_node_appends_updates() {
        let dir = tempfile::tempdir().unwrap();
        let snap_path = dir.path().join("snapshot.json");
        let updates_path = dir.path().join("updates.jsonl");
        let write = |snap: &LiquiditySnapshot| {
            std::fs::write(&snap_path, serde_json::to_string(snap).unwrap()).unwrap();
        };

        let mut snap = snapshot();
        write(&snap);
        let node = JsonFileNode::new(&snap_path, &updates_path);
        let mut e = FeeEngine::new(fast(), node, MemoryStore::default());
        e.tick().unwrap();
        assert!(!updates_path.exists());

        snap.timestamp = days(1);
        write(&snap);
        let report = e.tick().unwrap();
        assert_eq!(report.broadcast, 2);

        let written: Vec<PolicyUpdate> = std::fs::read_to_string(&updates_path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(written, report.updates);
    }

    // ========== Frequency invariance ==========

    #[test]
    fn hourly_and_daily_ticks_agree_on_constant_liquidity() {
        let mut hourly = engine(standard(), snapshot());
        for h in 0..=24 {
            move_to(&mut hourly, t0() + Duration::hours(h));
            hourly.tick().unwrap();
        }

        let mut daily = engine(standard(), snapshot());
        daily.tick().unwrap();
        move_to(&mut daily, days(1));
        daily.tick().unwrap();

        for id in ["02aa", "03bb"] {
            let h = hourly.store().state.peers[&peer(id)];
            let d = daily.store().state.peers[&peer(id)];
            assert!((h.spread - d.spread).abs() < 1e-9, "{id}: {} vs {}", h.spread, d.spread);
            assert!((h.error_ewma - d.error_ewma).abs() < 1e-12);
        }
        assert_eq!(hourly.store().saves, 25);
    }
}
