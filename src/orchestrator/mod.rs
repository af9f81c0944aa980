use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::candle_manager::CandleManager;
use crate::config::Settings;
use crate::error::AppError;
use crate::events::{DomainEvent, EventBus};
use crate::execution::{InvalidationMonitor, OrderManager, PositionTracker, SlManager, TrailingManager};
use crate::persistence::Persistence;
use crate::state_machine::StateMachine;
use crate::types::{
    create_trade_contract, Intent, IntentAction, LockReason, OrderRequest, Side, SlRule,
    StrategyState, SymbolState, TpRule, TradeContract, TrailMode,
};
use crate::watch::WatchManager;

/// Outcome of a routed intent. A rejected/cancelled `TradeContract` is a
/// normal result, not an error; gate denials and malformed intents are.
#[derive(Debug, Clone)]
pub enum IntentOutcome {
    Contract(TradeContract),
    Acknowledged,
    WatchCreated(String),
}

/// Single entry point for every structured intent and the sole owner of
/// cross-component wiring (spec 4.12). Grounded on the teacher's
/// `TradeExecutor::process_signal` gate → size → place → notify flow,
/// generalized from signal-driven dispatch to the fixed intent-action
/// routing table.
pub struct Orchestrator {
    state_machine: Arc<StateMachine>,
    order_manager: Arc<OrderManager>,
    position_tracker: Arc<PositionTracker>,
    sl_manager: Arc<SlManager>,
    trailing: Arc<TrailingManager>,
    invalidation: Arc<InvalidationMonitor>,
    watch: Arc<WatchManager>,
    candle_manager: Arc<CandleManager>,
    persistence: Arc<dyn Persistence>,
    events: EventBus,
    settings: Settings,
    latest_state: RwLock<HashMap<String, StrategyState>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state_machine: Arc<StateMachine>,
        order_manager: Arc<OrderManager>,
        position_tracker: Arc<PositionTracker>,
        sl_manager: Arc<SlManager>,
        trailing: Arc<TrailingManager>,
        invalidation: Arc<InvalidationMonitor>,
        watch: Arc<WatchManager>,
        candle_manager: Arc<CandleManager>,
        persistence: Arc<dyn Persistence>,
        events: EventBus,
        settings: Settings,
    ) -> Self {
        Self {
            state_machine,
            order_manager,
            position_tracker,
            sl_manager,
            trailing,
            invalidation,
            watch,
            candle_manager,
            persistence,
            events,
            settings,
            latest_state: RwLock::new(HashMap::new()),
        }
    }

    pub async fn handle_intent(&self, intent: Intent) -> Result<IntentOutcome, AppError> {
        match intent.action {
            Some(IntentAction::EnterLong) => self.handle_enter(intent, Side::Long).await,
            Some(IntentAction::EnterShort) => self.handle_enter(intent, Side::Short).await,
            Some(IntentAction::Close) => self.handle_close(intent, false).await,
            Some(IntentAction::ClosePartial) => self.handle_close(intent, true).await,
            Some(IntentAction::MoveSl) => self.handle_move_sl(intent).await,
            Some(IntentAction::Pause) => {
                self.state_machine.pause();
                Ok(IntentOutcome::Acknowledged)
            }
            Some(IntentAction::Resume) => {
                self.state_machine.resume();
                Ok(IntentOutcome::Acknowledged)
            }
            Some(IntentAction::WatchCreate) => self.handle_watch_create(intent).await,
            Some(IntentAction::WatchCancel) => {
                let symbol = intent.symbol.ok_or_else(|| AppError::InvalidIntent("watchCancel requires symbol".into()))?;
                self.watch.cancel(&symbol).await;
                Ok(IntentOutcome::Acknowledged)
            }
            Some(IntentAction::Info) | Some(IntentAction::Opinion) => Err(AppError::NotImplemented(
                "informational intents are handled by the out-of-scope conversational layer".into(),
            )),
            Some(IntentAction::Unknown) | None => Err(AppError::InvalidIntent("unrecognized intent".into())),
        }
    }

    async fn handle_enter(&self, intent: Intent, side: Side) -> Result<IntentOutcome, AppError> {
        let symbol = intent
            .symbol
            .clone()
            .ok_or_else(|| AppError::InvalidIntent("enter intent requires symbol".into()))?;

        self.state_machine.can_enter(&symbol).await?;

        let contract = create_trade_contract(&intent, side);
        if contract.is_rejected() {
            return Ok(IntentOutcome::Contract(contract));
        }

        self.execute_entry(contract).await.map(IntentOutcome::Contract)
    }

    async fn execute_entry(&self, mut contract: TradeContract) -> Result<TradeContract, AppError> {
        let cfg = self
            .settings
            .symbol(&contract.symbol)
            .ok_or_else(|| AppError::ContractRejected(format!("unconfigured symbol {}", contract.symbol)))?;

        let candles = self.candle_manager.snapshot(&contract.symbol, cfg.timeframe).await;
        let Some(last) = candles.last() else {
            return Err(AppError::ContractRejected("no candle history yet".into()));
        };
        let entry_price = last.close;

        let emergency_sl = SlManager::emergency_sl_price(entry_price, contract.emergency_sl_percent, contract.side);
        let risk_per_unit = (entry_price - emergency_sl).abs();
        if risk_per_unit.is_zero() {
            contract.status = crate::types::ContractStatus::Rejected;
            contract.reject_reason = Some("risk distance is zero".to_string());
            return Ok(contract);
        }

        let risk_amount = self.settings.general.risk_reference_notional * contract.risk_percent / Decimal::from(100);
        let size = risk_amount / risk_per_unit;
        if size.is_zero() {
            contract.status = crate::types::ContractStatus::Rejected;
            contract.reject_reason = Some("computed position size is zero".to_string());
            return Ok(contract);
        }

        let tp_price = match contract.tp_rule {
            TpRule::None => None,
            TpRule::Price => contract.tp_price,
            TpRule::Rr => contract.tp_rr.map(|rr| match contract.side {
                Side::Long => entry_price + risk_per_unit * rr,
                Side::Short => entry_price - risk_per_unit * rr,
            }),
        };

        let request = OrderRequest::market_entry(contract.symbol.as_str(), contract.side, size)
            .with_brackets(Some(emergency_sl), tp_price);

        let order = self.order_manager.place_market(request).await?;

        self.state_machine.enter(&contract.symbol, contract.side).await?;
        if let Some(strategic_sl) = self.strategic_sl_for_entry(&contract).await {
            self.sl_manager.arm(&contract.symbol, strategic_sl).await;
        }
        if contract.trail_mode != TrailMode::None {
            self.trailing.activate(&contract.symbol, contract.trail_mode, contract.side).await;
        }

        contract.status = crate::types::ContractStatus::Executed;
        contract.order_id = Some(order.id);
        contract.entry_price = Some(entry_price);
        contract.position_size = Some(size);
        contract.actual_sl_price = Some(emergency_sl);
        contract.actual_tp_price = tp_price;

        info!(symbol = %contract.symbol, side = %contract.side, size = %size, "entry executed");
        Ok(contract)
    }

    /// Derives the strategic SL to arm at entry from the contract's `sl_rule`
    /// (spec 4.8): SWING and SUPERTREND read the latest cached strategy
    /// state for the symbol, PRICE uses the contract's own `sl_price`, and
    /// NONE arms nothing. A rule that needs state that hasn't arrived yet
    /// leaves the position unarmed rather than falling back to the
    /// emergency SL, since that would silently defeat the two-layer design.
    async fn strategic_sl_for_entry(&self, contract: &TradeContract) -> Option<Decimal> {
        match contract.sl_rule {
            SlRule::Price => contract.sl_price,
            SlRule::Swing => {
                let states = self.latest_state.read().await;
                let levels = states.get(&contract.symbol)?.key_levels;
                match contract.side {
                    Side::Long => levels.protected_swing_low,
                    Side::Short => levels.protected_swing_high,
                }
            }
            SlRule::Supertrend => {
                let states = self.latest_state.read().await;
                states.get(&contract.symbol).map(|s| s.snapshot.supertrend_value)
            }
            SlRule::None => None,
        }
    }

    async fn handle_close(&self, intent: Intent, partial: bool) -> Result<IntentOutcome, AppError> {
        let symbol = intent
            .symbol
            .ok_or_else(|| AppError::InvalidIntent("close intent requires symbol".into()))?;

        let position = self
            .position_tracker
            .get(&symbol)
            .await
            .ok_or_else(|| AppError::GateDenied(format!("NOT_IN_POSITION:{symbol}")))?;

        self.state_machine.start_exit(&symbol).await?;

        let close_size = if partial {
            let percent = intent.close_percent.unwrap_or(Decimal::from(100));
            position.size * percent / Decimal::from(100)
        } else {
            position.size
        };

        let request = OrderRequest::market_exit(symbol.as_str(), position.side.opposite(), close_size);
        self.order_manager.place_market(request).await?;

        Ok(IntentOutcome::Acknowledged)
    }

    /// Resolved open question (SPEC_FULL §9): only the breakeven case is
    /// implemented. A request naming an arbitrary `newSlPrice` is schema-valid
    /// but rejected here.
    async fn handle_move_sl(&self, intent: Intent) -> Result<IntentOutcome, AppError> {
        let symbol = intent
            .symbol
            .ok_or_else(|| AppError::InvalidIntent("moveSl intent requires symbol".into()))?;

        if intent.new_sl_price.is_some() {
            return Err(AppError::NotImplemented(
                "MOVE_SL to an arbitrary price is not supported; only breakeven is".into(),
            ));
        }

        let position = self
            .position_tracker
            .get(&symbol)
            .await
            .ok_or_else(|| AppError::GateDenied(format!("NOT_IN_POSITION:{symbol}")))?;

        self.sl_manager.set_strategic_sl(&symbol, position.avg_price).await;
        Ok(IntentOutcome::Acknowledged)
    }

    async fn handle_watch_create(&self, intent: Intent) -> Result<IntentOutcome, AppError> {
        let symbol = intent
            .symbol
            .ok_or_else(|| AppError::InvalidIntent("watchCreate intent requires symbol".into()))?;
        let _ = symbol;
        Err(AppError::NotImplemented(
            "watchCreate requires a fully-populated WatchRule, not a bare intent".into(),
        ))
    }

    /// Reacts to one `stateUpdate`: evaluates invalidation, trailing, and
    /// watches for the symbol named in `state` (spec 4.9-4.11).
    async fn on_state_update(&self, state: &crate::types::StrategyState) {
        let symbol = &state.symbol;

        self.latest_state.write().await.insert(symbol.clone(), state.clone());

        self.invalidation.check(symbol, state.snapshot.last_price, state.key_levels).await;

        if let Some(mode) = self.trailing.mode_of(symbol).await {
            let candidate = match mode {
                TrailMode::Supertrend => Some(state.snapshot.supertrend_value),
                TrailMode::Structure => state.snapshot.protected_level,
                TrailMode::None => None,
            };
            if let Some(candidate) = candidate {
                self.trailing.advance(symbol, &self.sl_manager, candidate).await;
            }
        }

        if let Some(position) = self.position_tracker.get(symbol).await {
            if self.sl_manager.check_candle_close(symbol, position.side, state.snapshot.last_price).await {
                let request = OrderRequest::market_exit(symbol.as_str(), position.side.opposite(), position.size);
                if let Err(e) = self.order_manager.place_market(request).await {
                    warn!(symbol, error = %e, "strategic SL exit order failed");
                } else {
                    self.state_machine.exit_stopped(symbol, LockReason::StopLoss).await;
                }
            }
        }

        let auto_enter_intents = self.watch.evaluate(state).await;
        for intent in auto_enter_intents {
            if let Err(e) = self.handle_intent(intent).await {
                warn!(symbol, error = %e, "watch-triggered auto-enter intent rejected");
            }
        }
    }

    /// Reacts to a `positionClosed` callback from the tracker (spec 4.12):
    /// deactivates trailing and disarms the strategic SL; the FSM
    /// transition itself was already applied by whichever path (clean
    /// close, strategic SL, invalidation) initiated the exit.
    async fn on_position_closed(&self, symbol: &str) {
        self.trailing.deactivate(symbol).await;
        self.sl_manager.disarm(symbol).await;
        if self.state_machine.state_of(symbol).await == SymbolState::Exiting {
            self.state_machine.exit_clean(symbol).await;
        }
    }

    /// Drives the orchestrator's reactive half by subscribing to the shared
    /// event bus. Intended to be spawned once from the composition root.
    pub async fn run(self: Arc<Self>) {
        let mut rx = self.events.subscribe();
        loop {
            match rx.recv().await {
                Ok(emitted) => {
                    if let Err(e) = self.persistence.append_event(&emitted).await {
                        warn!(error = %e, "failed to persist event");
                    }
                    match emitted.event {
                        DomainEvent::StateUpdated { state } => self.on_state_update(&state).await,
                        DomainEvent::PositionClosed { symbol, .. } => self.on_position_closed(&symbol).await,
                        _ => {}
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "orchestrator event loop lagged, some events were dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Restore on startup (spec 4.12): replays persisted orders whose status
    /// indicates an open position, reconciles against the REST snapshot,
    /// and re-arms trailing/SL for each still-open symbol.
    pub async fn restore(&self) -> Result<(), AppError> {
        self.position_tracker.restore_from_rest().await?;
        let open_orders = self.persistence.load_open_trades().await?;

        for order in open_orders {
            let Some(position) = self.position_tracker.get(&order.symbol).await else {
                continue;
            };
            if self.state_machine.state_of(&order.symbol).await == SymbolState::Flat {
                self.state_machine.enter(&order.symbol, position.side).await.ok();
            }
            if let Some(sl) = position.stop_loss {
                self.sl_manager.arm(&order.symbol, sl).await;
            }
            info!(symbol = %order.symbol, "restored open position on startup");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GeneralSettings, SymbolSettings};
    use crate::exchange::{Exchange, ExchangeAck, PositionSnapshot};
    use crate::types::{Candle, OrderStatus, Timeframe};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    struct StubExchange;

    #[async_trait]
    impl Exchange for StubExchange {
        async fn get_klines(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            _limit: usize,
            _end: Option<DateTime<Utc>>,
        ) -> Result<Vec<Candle>, AppError> {
            Ok(vec![])
        }
        async fn place_market_order(&self, request: OrderRequest) -> Result<ExchangeAck, AppError> {
            Ok(ExchangeAck {
                order_link_id: request.client_order_id,
                exchange_order_id: "EX1".to_string(),
                status: OrderStatus::Open,
            })
        }
        async fn place_limit_order(&self, request: OrderRequest) -> Result<ExchangeAck, AppError> {
            self.place_market_order(request).await
        }
        async fn cancel_order(&self, _symbol: &str, _id: &str) -> Result<(), AppError> {
            Ok(())
        }
        async fn cancel_all_orders(&self, _symbol: &str) -> Result<(), AppError> {
            Ok(())
        }
        async fn get_position(&self, _symbol: &str) -> Result<Option<PositionSnapshot>, AppError> {
            Ok(None)
        }
        async fn get_all_positions(&self) -> Result<Vec<PositionSnapshot>, AppError> {
            Ok(vec![])
        }
    }

    struct Harness {
        orchestrator: Arc<Orchestrator>,
        state_machine: Arc<StateMachine>,
        position_tracker: Arc<PositionTracker>,
        candle_manager: Arc<CandleManager>,
    }

    fn harness() -> Harness {
        let events = EventBus::default();
        let exchange: Arc<dyn Exchange> = Arc::new(StubExchange);
        let path = format!("/tmp/orchestrator_test_{}", uuid::Uuid::new_v4());
        let persistence: Arc<dyn Persistence> =
            Arc::new(crate::persistence::SledPersistence::open(&path).unwrap());

        let state_machine = Arc::new(StateMachine::new(900));
        let order_manager = Arc::new(OrderManager::new(
            Arc::clone(&exchange),
            Arc::clone(&persistence),
            events.clone(),
        ));
        let position_tracker = Arc::new(PositionTracker::new(Arc::clone(&exchange), events.clone()));
        let sl_manager = Arc::new(SlManager::new(events.clone()));
        let trailing = Arc::new(TrailingManager::new(events.clone()));
        let invalidation = Arc::new(InvalidationMonitor::new(
            Arc::clone(&order_manager),
            Arc::clone(&position_tracker),
            Arc::clone(&state_machine),
            events.clone(),
        ));
        let watch = Arc::new(WatchManager::new(events.clone(), 86_400));
        let candle_manager = Arc::new(CandleManager::new(
            Arc::clone(&exchange),
            Arc::clone(&persistence),
            events.clone(),
            GeneralSettings::default(),
        ));

        let mut symbols = HashMap::new();
        symbols.insert(
            "BTCUSDT".to_string(),
            SymbolSettings {
                timeframe: Timeframe::M5,
                ..SymbolSettings::default()
            },
        );
        let settings = Settings {
            general: GeneralSettings::default(),
            symbols,
        };

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&state_machine),
            Arc::clone(&order_manager),
            Arc::clone(&position_tracker),
            sl_manager,
            trailing,
            invalidation,
            watch,
            Arc::clone(&candle_manager),
            persistence,
            events,
            settings,
        ));

        Harness {
            orchestrator,
            state_machine,
            position_tracker,
            candle_manager,
        }
    }

    fn closed_candle(close: rust_decimal::Decimal) -> Candle {
        let now = Utc::now();
        Candle {
            symbol: "BTCUSDT".into(),
            timeframe: Timeframe::M5,
            open_time: now - ChronoDuration::minutes(5),
            close_time: now - ChronoDuration::seconds(1),
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
        }
    }

    #[tokio::test]
    async fn enter_long_computes_size_from_risk_and_emergency_distance() {
        let h = harness();
        h.candle_manager.ingest(closed_candle(dec!(100))).await.unwrap();

        let outcome = h
            .orchestrator
            .handle_intent(Intent::enter("BTCUSDT", Side::Long))
            .await
            .unwrap();
        let IntentOutcome::Contract(contract) = outcome else {
            panic!("expected a contract outcome")
        };
        assert_eq!(contract.status, crate::types::ContractStatus::Executed);
        assert_eq!(contract.position_size, Some(dec!(12.5)));
        assert_eq!(contract.actual_sl_price, Some(dec!(96)));
    }

    #[tokio::test]
    async fn second_entry_on_same_symbol_is_gate_denied() {
        let h = harness();
        h.candle_manager.ingest(closed_candle(dec!(100))).await.unwrap();
        h.orchestrator
            .handle_intent(Intent::enter("BTCUSDT", Side::Long))
            .await
            .unwrap();

        let result = h
            .orchestrator
            .handle_intent(Intent::enter("BTCUSDT", Side::Short))
            .await;
        assert!(matches!(result, Err(AppError::GateDenied(_))));
    }

    #[tokio::test]
    async fn close_intent_submits_exit_and_enters_exiting_state() {
        let h = harness();
        h.candle_manager.ingest(closed_candle(dec!(100))).await.unwrap();
        h.orchestrator
            .handle_intent(Intent::enter("BTCUSDT", Side::Long))
            .await
            .unwrap();
        h.position_tracker
            .on_stream_frame(PositionSnapshot {
                symbol: "BTCUSDT".into(),
                side: Side::Long,
                size: dec!(12.5),
                avg_price: dec!(100),
                leverage: 5,
                mark_price: dec!(100),
                unrealized_pnl: dec!(0),
                realized_pnl: dec!(0),
            })
            .await;

        let mut close_intent = Intent::enter("BTCUSDT", Side::Long);
        close_intent.action = Some(IntentAction::Close);
        let outcome = h.orchestrator.handle_intent(close_intent).await.unwrap();
        assert!(matches!(outcome, IntentOutcome::Acknowledged));
        assert_eq!(h.state_machine.state_of("BTCUSDT").await, SymbolState::Exiting);
    }

    #[tokio::test]
    async fn close_without_open_position_is_gate_denied() {
        let h = harness();
        let mut close_intent = Intent::enter("BTCUSDT", Side::Long);
        close_intent.action = Some(IntentAction::Close);
        let result = h.orchestrator.handle_intent(close_intent).await;
        assert!(matches!(result, Err(AppError::GateDenied(_))));
    }

    #[tokio::test]
    async fn move_sl_to_arbitrary_price_is_rejected() {
        let h = harness();
        let mut intent = Intent::enter("BTCUSDT", Side::Long);
        intent.action = Some(IntentAction::MoveSl);
        intent.new_sl_price = Some(dec!(105));
        let result = h.orchestrator.handle_intent(intent).await;
        assert!(matches!(result, Err(AppError::NotImplemented(_))));
    }

    fn sample_state(symbol: &str, protected_swing_low: Decimal) -> StrategyState {
        use crate::types::{Bias, KeyLevels, MaReading, StrategyId, StrategySnapshot, SupertrendDirection, Trend};
        StrategyState {
            symbol: symbol.to_string(),
            timeframe: Timeframe::M5,
            timestamp: Utc::now(),
            candle_close_time: Utc::now(),
            bias: Bias::Bullish,
            allow_long_entry: true,
            allow_short_entry: false,
            strategy_id: Some(StrategyId::S101),
            key_levels: KeyLevels {
                protected_swing_low: Some(protected_swing_low),
                ..Default::default()
            },
            snapshot: StrategySnapshot {
                supertrend_value: dec!(95),
                supertrend_direction: SupertrendDirection::Long,
                sma200: MaReading { value: dec!(100), price_above: true, price_below: false },
                ema1000: MaReading { value: dec!(100), price_above: true, price_below: false },
                structure_bias: Bias::Bullish,
                trend: Trend::Uptrend,
                last_bos: None,
                last_choch: None,
                protected_level: Some(protected_swing_low),
                last_price: dec!(100),
                dist_to_sma200_pct: dec!(0),
                dist_to_ema1000_pct: dec!(0),
                dist_to_supertrend_pct: dec!(0),
            },
        }
    }

    #[tokio::test]
    async fn swing_rule_entry_arms_strategic_sl_to_protected_swing_low() {
        let h = harness();
        h.candle_manager.ingest(closed_candle(dec!(100))).await.unwrap();
        h.orchestrator.on_state_update(&sample_state("BTCUSDT", dec!(90))).await;

        let mut intent = Intent::enter("BTCUSDT", Side::Long);
        intent.sl_rule = Some(SlRule::Swing);
        let outcome = h.orchestrator.handle_intent(intent).await.unwrap();
        let IntentOutcome::Contract(contract) = outcome else {
            panic!("expected a contract outcome")
        };
        assert_eq!(contract.status, crate::types::ContractStatus::Executed);
        assert_eq!(h.orchestrator.sl_manager.strategic_sl("BTCUSDT").await, Some(dec!(90)));
        assert_eq!(contract.actual_sl_price, Some(dec!(96)));
    }

    #[tokio::test]
    async fn sl_rule_none_leaves_strategic_sl_unarmed() {
        let h = harness();
        h.candle_manager.ingest(closed_candle(dec!(100))).await.unwrap();

        let mut intent = Intent::enter("BTCUSDT", Side::Long);
        intent.sl_rule = Some(SlRule::None);
        h.orchestrator.handle_intent(intent).await.unwrap();

        assert_eq!(h.orchestrator.sl_manager.strategic_sl("BTCUSDT").await, None);
    }

    #[tokio::test]
    async fn position_closed_deactivates_trailing_and_disarms_sl() {
        let h = harness();
        h.candle_manager.ingest(closed_candle(dec!(100))).await.unwrap();
        h.orchestrator
            .handle_intent(Intent::enter("BTCUSDT", Side::Long))
            .await
            .unwrap();
        h.state_machine.start_exit("BTCUSDT").await.unwrap();

        h.orchestrator.on_position_closed("BTCUSDT").await;

        assert_eq!(h.state_machine.state_of("BTCUSDT").await, SymbolState::Flat);
        assert_eq!(h.orchestrator.sl_manager.strategic_sl("BTCUSDT").await, None);
    }
}
