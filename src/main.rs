fn main() -> anyhow::Result<()> {
    pos_order_relay::run()
}
