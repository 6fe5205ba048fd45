fn main() {
    thermalwatch_lib::run()
}
