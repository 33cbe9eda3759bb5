// ==========================================
// 追溯码分配引擎集成测试
// ==========================================
// 覆盖: 精确预留数量、等待补码重试、unknown 匹配规则、
//       并发占用互斥与换候选、重复投递幂等、分配完成解锁、晚到码备注
// ==========================================


#[cfg(test)]
mod allocation_test {
    use std::sync::Arc;
    use std::thread;

    use supply_trace::domain::supply::Supply;
    use supply_trace::domain::types::{MarkStatus, Resolved, SupplyStatus};
    use supply_trace::engine::{CheckOutcome, ReserveOutcome, SupplyNotice, TransitionPayload};

    use crate::test_helpers::{admit_supply, known, owner, p17, p78, seed_marks, setup_env};

    // ==========================================
    // 基本分配
    // ==========================================

    #[test]
    fn test_links_exactly_requested_quantity() {
        let env = setup_env();
        let seeded = seed_marks(&env, known(p78()), &owner(), 3);
        let supply = admit_supply(&env, "MSKU0000001", known(p78()), 2);

        let stored = env.state.supply_repo.find_by_id(&supply.supply_id).unwrap().unwrap();
        assert!(stored.lock.locked, "有需求数量的新货柜应加分配锁");

        let stats = env.drain();
        assert_eq!(stats.done, 2);

        let linked = env.state.mark_repo.list_by_supply(&supply.supply_id).unwrap();
        assert_eq!(linked.len(), 2);
        for mark in &linked {
            assert_eq!(mark.status, MarkStatus::Supply);
            assert!(mark.link_invariant_holds());
            assert!(mark.reservation_key.is_some());
        }

        let left: Vec<_> = seeded
            .iter()
            .filter(|id| !linked.iter().any(|m| &&m.mark_id == id))
            .collect();
        assert_eq!(left.len(), 1);
        let spare = env.state.mark_repo.find_by_id(left[0]).unwrap().unwrap();
        assert_eq!(spare.status, MarkStatus::Undefined);
        assert!(spare.supply_id.is_none());
    }

    #[test]
    fn test_unlocks_after_first_check() {
        let env = setup_env();
        seed_marks(&env, known(p78()), &owner(), 2);
        let supply = admit_supply(&env, "MSKU0000002", known(p78()), 2);

        env.drain();
        assert!(env.notifier.all().is_empty());

        // 首次核对在 30 秒后
        env.advance_and_drain(29);
        let stored = env.state.supply_repo.find_by_id(&supply.supply_id).unwrap().unwrap();
        assert!(stored.lock.locked);

        env.advance_and_drain(1);
        let stored = env.state.supply_repo.find_by_id(&supply.supply_id).unwrap().unwrap();
        assert!(!stored.lock.locked);
        assert_eq!(
            env.notifier.count(&SupplyNotice::Unlocked {
                supply_id: supply.supply_id.clone()
            }),
            1
        );
    }

    #[test]
    fn test_waits_for_marks_and_retries_every_15_seconds() {
        let env = setup_env();
        let supply = admit_supply(&env, "MSKU0000003", known(p78()), 2);

        let stats = env.drain();
        assert_eq!(stats.retried, 2, "无候选码时应延迟重试");

        seed_marks(&env, known(p78()), &owner(), 2);

        // 重试未到期
        let stats = env.drain();
        assert_eq!(stats.claimed, 0);
        assert!(env.state.mark_repo.list_by_supply(&supply.supply_id).unwrap().is_empty());

        env.advance_and_drain(15);
        assert_eq!(env.state.mark_repo.list_by_supply(&supply.supply_id).unwrap().len(), 2);

        env.advance_and_drain(15);
        let stored = env.state.supply_repo.find_by_id(&supply.supply_id).unwrap().unwrap();
        assert!(!stored.lock.locked);
    }

    #[test]
    fn test_partial_allocation_keeps_lock_and_rechecks() {
        let env = setup_env();
        seed_marks(&env, known(p78()), &owner(), 1);
        let supply = admit_supply(&env, "MSKU0000004", known(p78()), 2);

        env.drain();
        env.advance_and_drain(30);

        let stored = env.state.supply_repo.find_by_id(&supply.supply_id).unwrap().unwrap();
        assert!(stored.lock.locked);
        assert!(env.notifier.all().is_empty());

        let line_id = &supply.lines[0].line_id;
        assert_eq!(
            env.state.allocation.check_completion(&supply.supply_id, line_id).unwrap(),
            CheckOutcome::Pending {
                linked: 1,
                requested: 2
            }
        );
    }

    // ==========================================
    // 商品匹配
    // ==========================================

    #[test]
    fn test_unknown_line_only_takes_unknown_marks() {
        let env = setup_env();
        seed_marks(&env, known(p78()), &owner(), 1);
        let unknown_ids = seed_marks(&env, Resolved::Unresolved, &owner(), 1);

        let supply = admit_supply(&env, "MSKU0000005", Resolved::Unresolved, 1);
        env.drain();

        let linked = env.state.mark_repo.list_by_supply(&supply.supply_id).unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].mark_id, unknown_ids[0]);
    }

    #[test]
    fn test_product_mismatch_finds_no_candidate() {
        let env = setup_env();
        seed_marks(&env, known(p78()), &owner(), 1);

        let supply = admit_supply(&env, "MSKU0000006", known(p17()), 1);
        let line_id = supply.lines[0].line_id.clone();

        assert_eq!(
            env.state.allocation.reserve(&supply.supply_id, &line_id, 0).unwrap(),
            ReserveOutcome::NoCandidate
        );
    }

    #[test]
    fn test_marks_of_other_users_are_not_taken() {
        let env = setup_env();
        let stranger = supply_trace::domain::types::Owner::new("user-2", "profile-a");
        seed_marks(&env, known(p78()), &stranger, 1);

        let supply = admit_supply(&env, "MSKU0000007", known(p78()), 1);
        let line_id = supply.lines[0].line_id.clone();
        assert_eq!(
            env.state.allocation.reserve(&supply.supply_id, &line_id, 0).unwrap(),
            ReserveOutcome::NoCandidate
        );
    }

    // ==========================================
    // 幂等与过期请求
    // ==========================================

    #[test]
    fn test_reserve_is_idempotent_per_unit() {
        let env = setup_env();
        seed_marks(&env, known(p78()), &owner(), 2);
        let supply = admit_supply(&env, "MSKU0000008", known(p78()), 1);
        let line_id = supply.lines[0].line_id.clone();

        let first = env.state.allocation.reserve(&supply.supply_id, &line_id, 0).unwrap();
        let ReserveOutcome::Claimed { mark_id } = first else {
            panic!("首次预留应成功: {:?}", first);
        };

        let second = env.state.allocation.reserve(&supply.supply_id, &line_id, 0).unwrap();
        assert_eq!(second, ReserveOutcome::AlreadyReserved { mark_id });
        assert_eq!(
            env.state
                .mark_repo
                .count_linked(&supply.supply_id, &known(p78()))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_reserve_for_terminal_supply_or_out_of_range_unit_is_stale() {
        let env = setup_env();
        seed_marks(&env, known(p78()), &owner(), 1);
        let supply = admit_supply(&env, "MSKU0000009", known(p78()), 1);
        let line_id = supply.lines[0].line_id.clone();

        assert!(matches!(
            env.state.allocation.reserve(&supply.supply_id, &line_id, 1).unwrap(),
            ReserveOutcome::Stale(_)
        ));

        let mut stored = env.state.supply_repo.find_by_id(&supply.supply_id).unwrap().unwrap();
        stored.status = SupplyStatus::Canceled;
        env.state.supply_repo.save(&mut stored, "test").unwrap();

        assert!(matches!(
            env.state.allocation.reserve(&supply.supply_id, &line_id, 0).unwrap(),
            ReserveOutcome::Stale(_)
        ));
        // 过期的预留消息按跳过处理，不会占码
        let stats = env.drain();
        assert_eq!(stats.skipped, 1);
        assert!(env.state.mark_repo.list_by_supply(&supply.supply_id).unwrap().is_empty());
    }

    #[test]
    fn test_mark_claimed_after_cleared_receives_declaration_comment() {
        let env = setup_env();
        seed_marks(&env, known(p78()), &owner(), 1);
        let supply = admit_supply(&env, "MSKU0000011", known(p78()), 2);
        env.drain();

        // 分配未完成时推进到 CLEARED
        let payload = TransitionPayload::by("alice").with_declaration("DECL-1");
        for target in [SupplyStatus::Clearance, SupplyStatus::Cleared] {
            let report = env
                .state
                .transitions
                .apply_transitions(&[supply.supply_id.clone()], target, &payload);
            assert!(report.failed.is_empty(), "{:?}", report.failed);
        }
        env.drain();

        seed_marks(&env, known(p78()), &owner(), 1);
        env.advance_and_drain(15);
        env.advance_and_drain(15);

        let linked = env.state.mark_repo.list_by_supply(&supply.supply_id).unwrap();
        assert_eq!(linked.len(), 2);
        for mark in &linked {
            assert_eq!(mark.status, MarkStatus::Supply);
            assert_eq!(mark.comment.as_deref(), Some("DECL-1"));
        }
    }

    #[test]
    fn test_mark_claimed_before_cleared_has_no_comment_yet() {
        let env = setup_env();
        seed_marks(&env, known(p78()), &owner(), 1);
        let supply = admit_supply(&env, "MSKU0000012", known(p78()), 1);
        env.drain();

        let linked = env.state.mark_repo.list_by_supply(&supply.supply_id).unwrap();
        assert_eq!(linked.len(), 1);
        assert!(linked[0].comment.is_none());
    }

    // ==========================================
    // 并发
    // ==========================================

    #[test]
    fn test_concurrent_reservations_never_share_a_mark() {
        let env = setup_env();
        seed_marks(&env, known(p78()), &owner(), 1);

        let mut supply = Supply::new("MSKU0000010", owner());
        supply.add_line(known(p78()), None, 4);
        env.state.supply_repo.insert(&supply, "test").unwrap();
        let supply_id = supply.supply_id.clone();
        let line_id = supply.lines[0].line_id.clone();

        let handles: Vec<_> = (0..4u32)
            .map(|unit| {
                let allocation = Arc::clone(&env.state.allocation);
                let supply_id = supply_id.clone();
                let line_id = line_id.clone();
                thread::spawn(move || allocation.reserve(&supply_id, &line_id, unit).unwrap())
            })
            .collect();

        let outcomes: Vec<ReserveOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let claimed = outcomes
            .iter()
            .filter(|o| matches!(o, ReserveOutcome::Claimed { .. }))
            .count();
        assert_eq!(claimed, 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| **o == ReserveOutcome::NoCandidate)
                .count(),
            3
        );
        assert_eq!(env.state.mark_repo.list_by_supply(&supply_id).unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_losers_move_on_to_the_next_candidate() {
        let env = setup_env();
        let seeded = seed_marks(&env, known(p78()), &owner(), 4);

        let mut supply = Supply::new("MSKU0000013", owner());
        supply.add_line(known(p78()), None, 4);
        env.state.supply_repo.insert(&supply, "test").unwrap();
        let supply_id = supply.supply_id.clone();
        let line_id = supply.lines[0].line_id.clone();

        let handles: Vec<_> = (0..4u32)
            .map(|unit| {
                let allocation = Arc::clone(&env.state.allocation);
                let supply_id = supply_id.clone();
                let line_id = line_id.clone();
                thread::spawn(move || allocation.reserve(&supply_id, &line_id, unit).unwrap())
            })
            .collect();

        let mut claimed: Vec<String> = handles
            .into_iter()
            .map(|h| match h.join().unwrap() {
                ReserveOutcome::Claimed { mark_id } => mark_id,
                other => panic!("每个单位都应占到码: {:?}", other),
            })
            .collect();
        claimed.sort();
        claimed.dedup();
        assert_eq!(claimed.len(), 4);

        let mut expected = seeded.clone();
        expected.sort();
        assert_eq!(claimed, expected);
    }

    #[test]
    fn test_lost_claim_falls_through_to_next_candidate() {
        let env = setup_env();
        seed_marks(&env, known(p78()), &owner(), 2);
        let repo = &env.state.mark_repo;

        let first = repo.find_candidate(&known(p78()), &owner()).unwrap().unwrap();

        // 另一货柜先占走同一候选
        assert!(repo.try_claim(&first, "supply-other", "supply-other:line:0").unwrap());
        assert!(!repo.try_claim(&first, "supply-mine", "supply-mine:line:0").unwrap());

        let next = repo.find_candidate(&known(p78()), &owner()).unwrap().unwrap();
        assert_ne!(next, first);
        assert!(repo.try_claim(&next, "supply-mine", "supply-mine:line:0").unwrap());

        let mine = repo.find_by_reservation_key("supply-mine:line:0").unwrap().unwrap();
        assert_eq!(mine.mark_id, next);
        assert_eq!(mine.supply_id.as_deref(), Some("supply-mine"));
        assert!(repo.find_candidate(&known(p78()), &owner()).unwrap().is_none());
    }

    #[test]
    fn test_try_claim_is_exclusive_across_threads() {
        let env = setup_env();
        let ids = seed_marks(&env, known(p78()), &owner(), 1);
        let mark_id = ids[0].clone();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let repo = Arc::clone(&env.state.mark_repo);
                let mark_id = mark_id.clone();
                thread::spawn(move || {
                    repo.try_claim(&mark_id, &format!("supply-{}", i), &format!("supply-{}:line:0", i))
                        .unwrap()
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);

        let mark = env.state.mark_repo.find_by_id(&mark_id).unwrap().unwrap();
        assert_eq!(mark.status, MarkStatus::Supply);
        assert!(mark.link_invariant_holds());
    }
}
